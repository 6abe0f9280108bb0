//! A scripted, single-connection mock TCP server for verifying byte-exact
//! client behavior in tests.
//!
//! A test writes two interleaved scripts: the bytes the server must receive
//! ([MockServer::expected]) and the bytes it must send back
//! ([MockServer::response]). The server accepts one connection, checks every
//! received byte against the expected script in order, and sends each scripted
//! response as soon as all expectations written before it have been met.
//! [MockServer::verify] stops the server and reports the first mismatch,
//! socket failure, or leftover data.
//!
//!```no_run
//!     use std::io::{Read, Write};
//!     use std::net::TcpStream;
//!
//!     use mockwire::MockServer;
//!
//!     fn main() -> anyhow::Result<()> {
//!         let server = MockServer::bind(0)?;
//!
//!         write!(server.expected(), "GET / HTTP/1.1\r\n")?;
//!         write!(server.response(), "HTTP/1.1 200 OK\r\n")?;
//!
//!         let mut client = TcpStream::connect(server.local_addr())?;
//!         client.write_all(b"GET / HTTP/1.1\r\n")?;
//!
//!         let mut reply = vec![0; 17];
//!         client.read_exact(&mut reply)?;
//!         assert_eq!(reply, b"HTTP/1.1 200 OK\r\n");
//!
//!         server.verify()?;
//!         Ok(())
//!     }
//!```
//!
//! Set `MOCKWIRE_RECORDING_DIR` to keep a byte-level transcript of every
//! session; see [SessionRecorder].

mod error_handler;
mod errors;
mod recorder;
mod script;
mod server;

pub use errors::{Error, ErrorCategory};
pub use recorder::SessionRecorder;
pub use script::{ActionKind, ScriptStream};
pub use server::{MockServer, MockServerBuilder, DEFAULT_LINGER, DEFAULT_POLL_INTERVAL};
