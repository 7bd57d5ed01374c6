//! Per-connection dispatch: reads request lines, routes them into the
//! `ShardRouter`, writes response lines. Plain `tokio::io` line reading, no
//! `tokio_util` codec, since the wire format has no length-prefixed framing.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::server::protocol::{parse_line, Request, Response};
use crate::storage::router::ShardRouter;

/// Drives a single client connection until it sends `QUIT`, disconnects, or
/// a fatal I/O error occurs.
pub struct Handler {
    router: Arc<ShardRouter>,
}

impl Handler {
    pub fn new(router: Arc<ShardRouter>) -> Self {
        Handler { router }
    }

    pub async fn run(&self, socket: TcpStream) -> std::io::Result<()> {
        let (read_half, mut write_half) = socket.into_split();
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();

        loop {
            line.clear();
            let bytes_read = reader.read_line(&mut line).await?;
            if bytes_read == 0 {
                debug!("connection closed by peer");
                break;
            }
            if line.trim().is_empty() {
                continue;
            }

            let response = match parse_line(&line) {
                Ok(request) => {
                    let is_quit = matches!(request, Request::Quit);
                    let response = self.dispatch(request);
                    write_half.write_all(response.render().as_bytes()).await?;
                    if is_quit {
                        debug!("connection closed after QUIT");
                        break;
                    }
                    continue;
                }
                Err(err) => {
                    warn!(error = %err, line = %line.trim(), "failed to parse request line");
                    Response::Error(err.to_string())
                }
            };

            write_half.write_all(response.render().as_bytes()).await?;
        }

        Ok(())
    }

    fn dispatch(&self, request: Request) -> Response {
        match request {
            Request::Set { key, value } => match self.router.insert(key, value) {
                Ok(()) => Response::Ok,
                Err(err) => Response::Error(err.to_string()),
            },
            Request::Get { key } => match self.router.get(&key) {
                Ok(Some(value)) => Response::Value(value),
                Ok(None) => Response::Nil,
                Err(err) => Response::Error(err.to_string()),
            },
            Request::Del { key } => match self.router.delete(&key) {
                Ok(existed) => Response::Bool(existed),
                Err(err) => Response::Error(err.to_string()),
            },
            Request::Expire { key, ttl_millis } => {
                match self.router.expire(&key, ttl_millis) {
                    Ok(existed) => Response::Bool(existed),
                    Err(err) => Response::Error(err.to_string()),
                }
            }
            Request::Ping => Response::Pong,
            Request::Stats => {
                let stats = self.router.stats_snapshot();
                Response::Stats(vec![
                    format!("STAT gets {}", stats.gets),
                    format!("STAT hits {}", stats.hits),
                    format!("STAT misses {}", stats.misses),
                    format!("STAT sets {}", stats.sets),
                    format!("STAT deletes {}", stats.deletes),
                    format!("STAT expires {}", stats.expires),
                    format!("STAT evictions {}", stats.evictions),
                    format!("STAT expirations {}", stats.expirations),
                    format!("STAT size {}", self.router.size()),
                    format!("STAT shards {}", self.router.shard_count()),
                    format!("STAT capacity_per_shard {}", self.router.capacity_per_shard()),
                ])
            }
            Request::Quit => Response::Bye,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::storage::router::RouterConfig;
    use bytes::Bytes;

    fn handler() -> Handler {
        let router = Arc::new(ShardRouter::new(RouterConfig::new(4, 16), Arc::new(SystemClock)));
        Handler::new(router)
    }

    #[test]
    fn set_then_get_round_trips() {
        let h = handler();
        let set_resp = h.dispatch(Request::Set {
            key: Bytes::from_static(b"k"),
            value: Bytes::from_static(b"v"),
        });
        assert_eq!(set_resp, Response::Ok);

        let get_resp = h.dispatch(Request::Get { key: Bytes::from_static(b"k") });
        assert_eq!(get_resp, Response::Value(Bytes::from_static(b"v")));
    }

    #[test]
    fn get_missing_key_returns_nil() {
        let h = handler();
        assert_eq!(
            h.dispatch(Request::Get { key: Bytes::from_static(b"missing") }),
            Response::Nil
        );
    }

    #[test]
    fn ping_returns_pong() {
        let h = handler();
        assert_eq!(h.dispatch(Request::Ping), Response::Pong);
    }

    #[test]
    fn expire_with_nonpositive_ttl_is_an_error_response() {
        let h = handler();
        h.dispatch(Request::Set {
            key: Bytes::from_static(b"k"),
            value: Bytes::from_static(b"v"),
        });
        let resp = h.dispatch(Request::Expire { key: Bytes::from_static(b"k"), ttl_millis: 0 });
        assert!(matches!(resp, Response::Error(_)));
    }

}
