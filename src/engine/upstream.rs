use crate::shared::dns;
use std::fmt::{self, Display, Formatter};
use std::net::Ipv4Addr;
use std::{io, net, time};

/// Parameters controlling how queries are relayed to upstream resolvers.
#[derive(Debug, Clone)]
pub struct UpstreamParams {
    pub port: u16,
    pub timeout: time::Duration,
}

impl Default for UpstreamParams {
    fn default() -> Self {
        UpstreamParams {
            port: 53,
            timeout: time::Duration::from_secs(3),
        }
    }
}

#[derive(Debug)]
pub enum UpstreamErr {
    /// Every upstream in the list failed or timed out.
    Exhausted,
}

impl Display for UpstreamErr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamErr::Exhausted => write!(f, "all upstreams failed"),
        }
    }
}

/// Relay an encoded query to the upstreams, sequentially, returning the
/// first response obtained. The query bytes are sent verbatim (id
/// included), so the response id must match the query id and the returned
/// bytes can be relayed to the client as they are. Each upstream gets the
/// configured timeout before the next one is tried.
pub fn forward_query(
    query_wire: &[u8],
    upstreams: &[Ipv4Addr],
    params: &UpstreamParams,
) -> Result<Vec<u8>, UpstreamErr> {
    for upstream in upstreams {
        match query_one(query_wire, *upstream, params) {
            Ok(response) => return Ok(response),
            Err(err) => {
                log::warn!("Upstream {} failed: {}, trying next one.", upstream, err);
            }
        }
    }
    Err(UpstreamErr::Exhausted)
}

fn query_one(query_wire: &[u8], upstream: Ipv4Addr, params: &UpstreamParams) -> io::Result<Vec<u8>> {
    let socket = net::UdpSocket::bind("0.0.0.0:0")?;
    socket.set_read_timeout(Some(params.timeout))?;
    socket.set_write_timeout(Some(params.timeout))?;
    socket.send_to(query_wire, (upstream, params.port))?;

    let mut buffer = [0_u8; dns::MAX_UDP_MSG_BYTES];
    let (n_recv, _) = socket.recv_from(&mut buffer)?;
    if n_recv < 2 || buffer[..2] != query_wire[..2] {
        let err_msg = "response id does not match query id";
        return Err(io::Error::new(io::ErrorKind::InvalidData, err_msg));
    }
    Ok(buffer[..n_recv].to_vec())
}
