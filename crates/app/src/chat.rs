use reqwest::multipart::{Form, Part};
use reqwest::Client;
use std::io::Write;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;
use unibot_core::{Answer, DocumentFormat, Role, Turn, UploadOutcome, UploadStatus};
use url::Url;
use uuid::Uuid;

pub const UPLOAD_ERROR: &str = "Upload error";
pub const AI_ERROR: &str = "AI connection error";
pub const CONNECTION_ERROR: &str = "Connection error. Check if the server is running";
const UNSUPPORTED_UPLOAD: &str = "Only PDF and TXT files can be uploaded";

#[derive(Debug, PartialEq, Eq)]
pub enum ChatCommand<'a> {
    Ask(&'a str),
    Upload(&'a str),
    History,
    Quit,
    Empty,
}

pub fn parse_command(line: &str) -> ChatCommand<'_> {
    let line = line.trim();
    match line.split_once(char::is_whitespace) {
        Some(("/upload", path)) => ChatCommand::Upload(path.trim()),
        _ => match line {
            "" => ChatCommand::Empty,
            "/upload" => ChatCommand::Upload(""),
            "/history" => ChatCommand::History,
            "/quit" | "/exit" => ChatCommand::Quit,
            question => ChatCommand::Ask(question),
        },
    }
}

pub fn sources_line(sources: &[String]) -> Option<String> {
    let mut unique: Vec<&str> = Vec::with_capacity(sources.len());
    for source in sources {
        if !unique.contains(&source.as_str()) {
            unique.push(source.as_str());
        }
    }

    (!unique.is_empty()).then(|| format!("Sources: {}", unique.join(", ")))
}

#[derive(Debug)]
pub enum AskReply {
    Answered(Answer),
    Failed(&'static str),
}

pub struct ChatClient {
    http: Client,
    server: Url,
    session_id: String,
    transcript: Vec<Turn>,
}

impl ChatClient {
    pub fn new(mut server: Url) -> Self {
        if !server.path().ends_with('/') {
            let path = format!("{}/", server.path());
            server.set_path(&path);
        }

        Self {
            http: Client::new(),
            server,
            session_id: Uuid::new_v4().to_string(),
            transcript: Vec::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn transcript(&self) -> &[Turn] {
        &self.transcript
    }

    pub async fn upload(&self, path: &Path) -> String {
        let Some(file_name) = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
        else {
            return UPLOAD_ERROR.to_string();
        };
        if DocumentFormat::from_file_name(&file_name).is_none() {
            return UNSUPPORTED_UPLOAD.to_string();
        }

        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(error) => {
                warn!(path = %path.display(), %error, "cannot read upload");
                return UPLOAD_ERROR.to_string();
            }
        };
        let Ok(url) = self.server.join("upload") else {
            return UPLOAD_ERROR.to_string();
        };

        let form = Form::new().part("file", Part::bytes(bytes).file_name(file_name.clone()));
        let response = match self.http.post(url).multipart(form).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                warn!(status = %response.status(), "upload rejected");
                return UPLOAD_ERROR.to_string();
            }
            Err(error) => {
                warn!(%error, "upload request failed");
                return UPLOAD_ERROR.to_string();
            }
        };

        match response.json::<UploadOutcome>().await {
            Ok(outcome) if outcome.status == UploadStatus::Success => {
                format!("{file_name} uploaded")
            }
            Ok(outcome) => outcome.message,
            Err(_) => UPLOAD_ERROR.to_string(),
        }
    }

    pub async fn ask(&mut self, question: &str) -> AskReply {
        self.transcript.push(Turn::user(question));

        let Ok(mut url) = self.server.join("ask") else {
            return AskReply::Failed(AI_ERROR);
        };
        url.query_pairs_mut()
            .append_pair("question", question)
            .append_pair("session_id", &self.session_id);

        let response = match self.http.get(url).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                warn!(status = %response.status(), "ask rejected");
                return AskReply::Failed(AI_ERROR);
            }
            Err(error) if error.is_connect() => return AskReply::Failed(CONNECTION_ERROR),
            Err(error) => {
                warn!(%error, "ask request failed");
                return AskReply::Failed(AI_ERROR);
            }
        };

        match response.json::<Answer>().await {
            Ok(answer) => {
                self.transcript.push(Turn::assistant(answer.answer.clone()));
                AskReply::Answered(answer)
            }
            Err(_) => AskReply::Failed(AI_ERROR),
        }
    }
}

fn prompt() -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    write!(stdout, "> ")?;
    stdout.flush()
}

pub async fn run(server: Url) -> anyhow::Result<()> {
    let mut client = ChatClient::new(server);
    println!("UniBot: Study Assistant (session {})", client.session_id());
    println!("Ask a question, or use /upload <path>, /history, /quit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };

        match parse_command(&line) {
            ChatCommand::Empty => {}
            ChatCommand::Quit => break,
            ChatCommand::Upload("") => println!("Usage: /upload <path>"),
            ChatCommand::Upload(path) => println!("{}", client.upload(Path::new(path)).await),
            ChatCommand::History => {
                for turn in client.transcript() {
                    let speaker = match turn.role {
                        Role::User => "you",
                        _ => "unibot",
                    };
                    println!("[{}] {speaker}: {}", turn.at.format("%H:%M:%S"), turn.content);
                }
            }
            ChatCommand::Ask(question) => match client.ask(question).await {
                AskReply::Answered(answer) => {
                    println!("{}", answer.answer);
                    if let Some(sources) = sources_line(&answer.sources) {
                        println!("{sources}");
                    }
                }
                AskReply::Failed(message) => println!("{message}"),
            },
        }
    }

    Ok(())
}
