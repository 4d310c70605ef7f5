use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorCommand {
    /// Switch the light off and drop any in-progress hold.
    ForceOff,
    Quit,
}

pub fn parse_command(line: &str) -> Option<OperatorCommand> {
    match line.trim() {
        "f" | "F" => Some(OperatorCommand::ForceOff),
        "q" | "Q" => Some(OperatorCommand::Quit),
        _ => None,
    }
}

/// Reads operator commands from stdin, one per line, until EOF.
pub fn spawn_stdin_reader(tx: mpsc::Sender<OperatorCommand>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match parse_command(&line) {
                    Some(command) => {
                        if tx.send(command).await.is_err() {
                            break;
                        }
                    }
                    None => log::debug!("ignoring operator input {line:?}"),
                },
                Ok(None) => {
                    log::debug!("operator input closed");
                    break;
                }
                Err(err) => {
                    log::warn!("failed to read operator input: {err}");
                    break;
                }
            }
        }
    })
}
