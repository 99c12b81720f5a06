//! Ping request.

use bytes::BytesMut;

use super::Query;
use crate::error::Result;
use crate::protocol::{codes, RequestCode};
use crate::schema::PackData;

/// Liveness check with an empty body.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ping;

impl Query for Ping {
    fn pack(&self, _data: &PackData, _body: &mut BytesMut) -> Result<RequestCode> {
        Ok(RequestCode::new(codes::PING))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_is_empty() {
        let mut body = BytesMut::new();
        let code = Ping.pack(&PackData::default(), &mut body).unwrap();
        assert_eq!(code, RequestCode::Compact(0x40));
        assert!(body.is_empty());
    }
}
