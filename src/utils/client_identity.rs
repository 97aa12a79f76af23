//! Client identification from request headers.
//!
//! Visitors are identified by a `uid` cookie or `X-Client-Uid` header when
//! present; otherwise a stable pseudonym is derived from address and user
//! agent so unique-visitor counts still mean something for anonymous clients.

use axum::http::{HeaderMap, header};
use sha2::{Digest, Sha256};
use std::net::IpAddr;

use crate::domain::access_event::RequestMeta;

pub const UID_COOKIE: &str = "uid";
pub const UID_HEADER: &str = "x-client-uid";

/// Longest client-supplied uid kept; longer values are ignored.
const MAX_UID_LENGTH: usize = 128;

fn header_str<'a>(headers: &'a HeaderMap, name: impl header::AsHeaderName) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .find_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            (key == name).then_some(value.trim())
        })
        .filter(|v| !v.is_empty())
}

/// Client address: the first `X-Forwarded-For` hop or `X-Real-IP` when
/// behind a trusted proxy, the socket peer otherwise.
pub fn client_ip(headers: &HeaderMap, peer: Option<IpAddr>, behind_proxy: bool) -> Option<String> {
    if behind_proxy {
        let forwarded = header_str(headers, "x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .or_else(|| header_str(headers, "x-real-ip"))
            .and_then(|v| v.trim().parse::<IpAddr>().ok());
        if let Some(ip) = forwarded {
            return Some(ip.to_string());
        }
    }
    peer.map(|ip| ip.to_string())
}

/// Visitor identity for unique-visitor counting.
pub fn client_uid(headers: &HeaderMap, ip: Option<&str>) -> Option<String> {
    let supplied = cookie(headers, UID_COOKIE)
        .or_else(|| header_str(headers, UID_HEADER))
        .filter(|uid| uid.len() <= MAX_UID_LENGTH);
    if let Some(uid) = supplied {
        return Some(uid.to_string());
    }

    let user_agent = header_str(headers, header::USER_AGENT);
    if ip.is_none() && user_agent.is_none() {
        return None;
    }

    let mut hasher = Sha256::new();
    hasher.update(ip.unwrap_or_default().as_bytes());
    hasher.update(b"|");
    hasher.update(user_agent.unwrap_or_default().as_bytes());
    let digest = hasher.finalize();
    Some(format!("anon-{}", hex::encode(&digest[..12])))
}

/// Headers captured with an access event.
pub fn request_meta(headers: &HeaderMap) -> RequestMeta {
    RequestMeta {
        user_agent: header_str(headers, header::USER_AGENT).map(str::to_string),
        referer: header_str(headers, header::REFERER).map(str::to_string),
        accept_language: header_str(headers, header::ACCEPT_LANGUAGE).map(str::to_string),
    }
}
