// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-response framing negotiation.

use rand::Rng;
use ripple_proto::FramingToken;

/// True when the enhanced-navigation request header value asks for framing.
///
/// Any non-empty value other than `false`/`0` counts.
pub fn is_enhanced_request(header_value: Option<&str>) -> bool {
    match header_value.map(str::trim) {
        None | Some("") => false,
        Some(v) => !(v.eq_ignore_ascii_case("false") || v == "0"),
    }
}

/// Fresh random framing token for an enhanced request, the empty token
/// otherwise.
pub fn negotiate(enhanced: bool) -> FramingToken {
    if !enhanced {
        return FramingToken::empty();
    }
    let id: u128 = rand::thread_rng().gen();
    FramingToken::new(format!("{id:032x}"))
}
