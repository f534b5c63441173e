/// Errors generated during messages decoding. The forwarder treats any of
/// these as a malformed datagram and drops it without replying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireErr {
    BytesEnd,
    LongName,
    LongLabel,
    MaxRedirections,
    MalformedLabel,
    NotAscii,
}

pub(super) fn check_end<T>(opt: Option<T>) -> Result<T, WireErr> {
    match opt {
        None => Err(WireErr::BytesEnd),
        Some(v) => Ok(v),
    }
}
