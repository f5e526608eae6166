use log::{debug, info};
use shared::{
    answer_digest, decode_frame, join_subfields, split_subfields, Command, Frame,
    FrameFormatError, CMD_FIELD_LENGTH, LENGTH_FIELD_LENGTH, MSG_HEADER_LENGTH,
};
use std::io;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};

/// Fields of a `YOUR_QUESTION` payload after the id and the question text.
const CHOICE_COUNT: usize = 4;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("server sent an undecodable frame")]
    Frame(#[from] FrameFormatError),
    #[error("server refused the request: {0}")]
    Server(String),
    #[error("expected {expected} but the server answered {found}")]
    Unexpected {
        expected: &'static str,
        found: Command,
    },
    #[error("server sent a malformed {0} payload")]
    MalformedPayload(Command),
}

/// A question as presented to the player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServedQuestion {
    pub id: String,
    pub text: String,
    pub choices: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerOutcome {
    Correct,
    Wrong { correct_answer: String },
}

/// One connection to a trivia server, used strictly request by request.
pub struct TriviaClient {
    stream: TcpStream,
}

impl TriviaClient {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        info!("Connected to {}", stream.peer_addr()?);
        Ok(Self { stream })
    }

    pub async fn send(&mut self, command: Command, payload: &str) -> Result<(), ClientError> {
        let bytes = Frame::new(command, payload).encode()?;
        debug!("Sending {} ({} bytes)", command, bytes.len());
        self.stream.write_all(&bytes).await?;
        Ok(())
    }

    /// Reads exactly one frame, using the length field to find its end.
    pub async fn receive(&mut self) -> Result<Frame, ClientError> {
        let mut message = vec![0u8; MSG_HEADER_LENGTH];
        self.stream.read_exact(&mut message).await?;

        let length_start = CMD_FIELD_LENGTH + 1;
        let length_field = &message[length_start..length_start + LENGTH_FIELD_LENGTH];
        let length = std::str::from_utf8(length_field)
            .ok()
            .and_then(|field| field.parse::<usize>().ok())
            .ok_or(FrameFormatError)?;

        message.resize(MSG_HEADER_LENGTH + length, 0);
        self.stream.read_exact(&mut message[MSG_HEADER_LENGTH..]).await?;

        let (command, payload) = decode_frame(&message)?;
        debug!("Received {}", command);
        Ok(Frame { command, payload })
    }

    /// Sends a request and waits for its reply. `ERROR` replies become
    /// [`ClientError::Server`].
    pub async fn request(
        &mut self,
        command: Command,
        payload: &str,
    ) -> Result<Frame, ClientError> {
        self.send(command, payload).await?;
        let reply = self.receive().await?;
        if reply.command == Command::Error {
            return Err(ClientError::Server(reply.payload));
        }
        Ok(reply)
    }

    pub async fn login(&mut self, username: &str, password: &str) -> Result<(), ClientError> {
        let reply = self
            .request(Command::Login, &join_subfields(&[username, password]))
            .await?;
        expect(&reply, Command::LoginOk, "LOGIN_OK")
    }

    /// Registers a new user. The connection stays logged out.
    pub async fn signup(&mut self, username: &str, password: &str) -> Result<(), ClientError> {
        let reply = self
            .request(Command::Signup, &join_subfields(&[username, password]))
            .await?;
        expect(&reply, Command::SignUpOk, "SIGN_UP_OK")
    }

    /// Logs out and waits for the server to close the connection.
    pub async fn logout(mut self) -> Result<(), ClientError> {
        self.send(Command::Logout, "").await?;
        let mut rest = Vec::new();
        self.stream.read_to_end(&mut rest).await?;
        info!("Logged out");
        Ok(())
    }

    pub async fn score(&mut self) -> Result<u32, ClientError> {
        let reply = self.request(Command::MyScore, "").await?;
        expect(&reply, Command::YourScore, "YOUR_SCORE")?;
        reply
            .payload
            .parse()
            .map_err(|_| ClientError::MalformedPayload(Command::YourScore))
    }

    /// The rank line and highscore table, as formatted by the server.
    pub async fn highscore(&mut self) -> Result<String, ClientError> {
        let reply = self.request(Command::Highscore, "").await?;
        expect(&reply, Command::AllScore, "ALL_SCORE")?;
        Ok(reply.payload)
    }

    pub async fn logged_users(&mut self) -> Result<Vec<String>, ClientError> {
        let reply = self.request(Command::Logged, "").await?;
        expect(&reply, Command::LoggedAnswer, "LOGGED_ANSWER")?;
        if reply.payload.is_empty() {
            return Ok(Vec::new());
        }
        Ok(reply.payload.split(',').map(str::to_owned).collect())
    }

    /// Asks for a question; `None` once the game is finished for this user.
    pub async fn next_question(&mut self) -> Result<Option<ServedQuestion>, ClientError> {
        let reply = self.request(Command::GetQuestion, "").await?;
        match reply.command {
            Command::FinishedAnswer => Ok(None),
            Command::YourQuestion => parse_question(&reply.payload).map(Some),
            found => Err(ClientError::Unexpected {
                expected: "YOUR_QUESTION",
                found,
            }),
        }
    }

    /// Submits the digest of `answer` for `question_id`.
    pub async fn answer(
        &mut self,
        question_id: &str,
        answer: &str,
    ) -> Result<AnswerOutcome, ClientError> {
        let payload = join_subfields(&[question_id.to_string(), answer_digest(answer)]);
        let reply = self.request(Command::SendAnswer, &payload).await?;
        match reply.command {
            Command::CorrectAnswer => Ok(AnswerOutcome::Correct),
            Command::WrongAnswer => Ok(AnswerOutcome::Wrong {
                correct_answer: reply.payload,
            }),
            found => Err(ClientError::Unexpected {
                expected: "CORRECT_ANSWER or WRONG_ANSWER",
                found,
            }),
        }
    }
}

fn expect(reply: &Frame, command: Command, name: &'static str) -> Result<(), ClientError> {
    if reply.command != command {
        return Err(ClientError::Unexpected {
            expected: name,
            found: reply.command,
        });
    }
    Ok(())
}

fn parse_question(payload: &str) -> Result<ServedQuestion, ClientError> {
    let mut fields = split_subfields(payload, CHOICE_COUNT + 1)
        .map_err(|_| ClientError::MalformedPayload(Command::YourQuestion))?
        .into_iter();

    let (Some(id), Some(text)) = (fields.next(), fields.next()) else {
        return Err(ClientError::MalformedPayload(Command::YourQuestion));
    };
    Ok(ServedQuestion {
        id,
        text,
        choices: fields.collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_test::assert_ok;

    #[test]
    fn test_parse_question() {
        let question = parse_question("abc#Largest planet?#Mars#Jupiter#Venus#Earth").unwrap();
        assert_eq!(question.id, "abc");
        assert_eq!(question.text, "Largest planet?");
        assert_eq!(question.choices, vec!["Mars", "Jupiter", "Venus", "Earth"]);

        assert!(matches!(
            parse_question("abc#Largest planet?#Mars"),
            Err(ClientError::MalformedPayload(Command::YourQuestion))
        ));
    }

    /// Serves canned replies to whatever the client sends.
    async fn canned_server(
        replies: Vec<Frame>,
    ) -> (std::net::SocketAddr, tokio::task::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            for reply in replies {
                let mut buf = [0u8; 1024];
                let n = stream.read(&mut buf).await.unwrap();
                received.extend_from_slice(&buf[..n]);
                stream.write_all(&reply.encode().unwrap()).await.unwrap();
            }
            received
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn test_login_sends_credentials() {
        let (addr, server) = canned_server(vec![Frame::empty(Command::LoginOk)]).await;
        let mut client = TriviaClient::connect(addr).await.unwrap();

        client.login("bob", "pw").await.unwrap();

        let received = server.await.unwrap();
        assert_eq!(received, b"LOGIN           |0006|bob#pw");
    }

    #[tokio::test]
    async fn test_error_reply_becomes_server_error() {
        let (addr, _server) =
            canned_server(vec![Frame::new(Command::Error, "user not found")]).await;
        let mut client = TriviaClient::connect(addr).await.unwrap();

        let err = client.login("bob", "pw").await.unwrap_err();
        assert!(matches!(err, ClientError::Server(message) if message == "user not found"));
    }

    #[tokio::test]
    async fn test_score_and_logged_users() {
        let (addr, _server) = canned_server(vec![
            Frame::new(Command::YourScore, "15"),
            Frame::new(Command::LoggedAnswer, "alice,bob"),
            Frame::empty(Command::FinishedAnswer),
        ])
        .await;
        let mut client = TriviaClient::connect(addr).await.unwrap();

        assert_eq!(assert_ok!(client.score().await), 15);
        assert_eq!(assert_ok!(client.logged_users().await), vec!["alice", "bob"]);
        assert_eq!(assert_ok!(client.next_question().await), None);
    }

    #[tokio::test]
    async fn test_answer_outcomes() {
        let (addr, _server) = canned_server(vec![
            Frame::empty(Command::CorrectAnswer),
            Frame::new(Command::WrongAnswer, "Jupiter"),
        ])
        .await;
        let mut client = TriviaClient::connect(addr).await.unwrap();

        assert_eq!(
            client.answer("q1", "Jupiter").await.unwrap(),
            AnswerOutcome::Correct
        );
        assert_eq!(
            client.answer("q1", "Mars").await.unwrap(),
            AnswerOutcome::Wrong {
                correct_answer: "Jupiter".into()
            }
        );
    }
}
