//! The Telnet protocol engine: IAC parsing, RFC 855 option negotiation,
//! subnegotiation framing, and the state save/restore used around transfers.

pub mod command;
mod engine;
pub mod option;
pub mod session;

pub use engine::escape_iac;
pub use session::TelnetSession;

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};

    use super::*;
    use crate::telnet::command;

    async fn loopback() -> (TelnetSession, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (TelnetSession::new(client), server)
    }

    #[tokio::test]
    async fn negotiation_basic_do_echo() {
        let (mut session, mut server) = loopback().await;

        // Feed the raw bytes straight into the session's parser (as the
        // session loop would after reading them off the socket).
        let decoded = session
            .feed(&[command::IAC, command::DO, command::option::ECHO])
            .await
            .unwrap();
        assert!(decoded.is_empty());

        // ECHO isn't locally supported, so the reply should be WONT.
        let mut reply = [0u8; 16];
        let n = server.read(&mut reply).await.unwrap();
        assert_eq!(
            &reply[..n],
            &[command::IAC, command::WONT, command::option::ECHO]
        );

        // A second identical DO produces no further reply since the
        // recorded (declined) state didn't change.
        session
            .feed(&[command::IAC, command::DO, command::option::ECHO])
            .await
            .unwrap();
        let res = tokio::time::timeout(std::time::Duration::from_millis(50), server.read(&mut reply))
            .await;
        assert!(res.is_err(), "expected no further reply, got one");
    }

    #[tokio::test]
    async fn ttype_cycles_through_offered_list() {
        let (mut session, mut server) = loopback().await;
        for expected in ["XTERM", "VT100", "ANSI", "XTERM"] {
            let mut input = vec![
                command::IAC,
                command::SB,
                command::option::TTYPE,
                command::sub::SEND,
            ];
            input.extend_from_slice(&[command::IAC, command::SE]);
            session.feed(&input).await.unwrap();

            let mut reply = vec![0u8; 64];
            let n = server.read(&mut reply).await.unwrap();
            let mut want = vec![
                command::IAC,
                command::SB,
                command::option::TTYPE,
                command::sub::IS,
            ];
            want.extend_from_slice(expected.as_bytes());
            want.extend_from_slice(&[command::IAC, command::SE]);
            assert_eq!(&reply[..n], want.as_slice());
        }
    }

    #[tokio::test]
    async fn iac_inside_data_is_unescaped() {
        let (mut session, _server) = loopback().await;
        let decoded = session
            .feed(&[0x01, command::IAC, command::IAC, 0x02])
            .await
            .unwrap();
        assert_eq!(decoded, vec![0x01, 0xFF, 0x02]);
    }
}
