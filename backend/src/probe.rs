use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio::net::TcpStream;

/// Yes/no signal gating every delivery attempt.
#[async_trait]
pub trait Connectivity: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// Opens (and immediately drops) a TCP connection to a well-known host.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    addr: String,
    timeout: Option<Duration>,
}

impl TcpProbe {
    pub fn new(addr: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Connectivity for TcpProbe {
    async fn is_online(&self) -> bool {
        let connect = TcpStream::connect(self.addr.as_str());
        let res = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, connect).await {
                Ok(res) => res,
                Err(_) => {
                    debug!("Probe to {} timed out after {:?}", self.addr, timeout);
                    return false;
                }
            },
            None => connect.await,
        };

        match res {
            Ok(_stream) => true,
            Err(e) => {
                debug!("Probe to {} failed: {}", self.addr, e);
                false
            }
        }
    }
}
