//! The materialised request handed to resource handlers.
//!
//! A [`Request`] is mutable while the lifecycle engine assembles it from
//! parser callbacks and read-only once a handler sees it: by then the
//! method, normalised path, version, peer identity, headers, cookies,
//! footers, arguments and (for bodyful methods) the complete raw body are
//! all populated.

use std::collections::HashMap;
use std::net::IpAddr;

#[derive(Debug, Default)]
pub struct Request {
    method: String,
    path: String,
    version: String,
    querystring: String,
    args: HashMap<String, String>,
    headers: HashMap<String, String>,
    cookies: HashMap<String, String>,
    footers: HashMap<String, String>,
    content: Vec<u8>,
    requestor: Option<IpAddr>,
    requestor_port: u16,
    user: Option<String>,
    pass: Option<String>,
    digested_user: Option<String>,
}

impl Request {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Unescaped, normalised request path.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// The query string reassembled in `?k=v&k=v` arrival order, values
    /// still in wire form.
    pub fn querystring(&self) -> &str {
        &self.querystring
    }

    /// Look up an argument: a query parameter, a form field or a captured
    /// path parameter, all unescaped. Later writers win on name clashes.
    pub fn arg(&self, name: &str) -> Option<&str> {
        self.args.get(name).map(String::as_str)
    }

    pub fn args(&self) -> &HashMap<String, String> {
        &self.args
    }

    /// Header lookup; names are case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn cookies(&self) -> &HashMap<String, String> {
        &self.cookies
    }

    pub fn footer(&self, name: &str) -> Option<&str> {
        self.footers.get(name).map(String::as_str)
    }

    pub fn footers(&self) -> &HashMap<String, String> {
        &self.footers
    }

    /// The raw request body, byte-identical to what arrived on the wire.
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn requestor(&self) -> Option<IpAddr> {
        self.requestor
    }

    pub fn requestor_port(&self) -> u16 {
        self.requestor_port
    }

    /// Basic-auth username, when basic auth extraction is enabled and the
    /// client sent credentials.
    pub fn username(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.pass.as_deref()
    }

    /// Digest-auth username, when digest auth extraction is enabled.
    pub fn digested_user(&self) -> Option<&str> {
        self.digested_user.as_deref()
    }

    pub(crate) fn set_method(&mut self, method: &str) {
        self.method = method.to_string();
    }

    pub(crate) fn set_path(&mut self, path: &str) {
        self.path = path.to_string();
    }

    pub(crate) fn set_version(&mut self, version: &str) {
        self.version = version.to_string();
    }

    pub(crate) fn set_header(&mut self, key: &str, value: &str) {
        self.headers
            .insert(key.to_ascii_lowercase(), value.to_string());
    }

    pub(crate) fn set_cookie(&mut self, key: &str, value: &str) {
        self.cookies.insert(key.to_string(), value.to_string());
    }

    pub(crate) fn set_footer(&mut self, key: &str, value: &str) {
        self.footers.insert(key.to_string(), value.to_string());
    }

    pub(crate) fn set_arg(&mut self, key: &str, value: &str) {
        self.args.insert(key.to_string(), value.to_string());
    }

    /// Append one raw query pair to the reassembled query string.
    pub(crate) fn push_query_raw(&mut self, key: &str, value: &str) {
        let sep = if self.querystring.is_empty() { '?' } else { '&' };
        self.querystring.push(sep);
        self.querystring.push_str(key);
        self.querystring.push('=');
        self.querystring.push_str(value);
    }

    pub(crate) fn grow_content(&mut self, chunk: &[u8]) {
        self.content.extend_from_slice(chunk);
    }

    pub(crate) fn set_requestor(&mut self, ip: IpAddr) {
        self.requestor = Some(ip);
    }

    pub(crate) fn set_requestor_port(&mut self, port: u16) {
        self.requestor_port = port;
    }

    pub(crate) fn set_credentials(&mut self, user: String, pass: String) {
        self.user = Some(user);
        self.pass = Some(pass);
    }

    pub(crate) fn set_digested_user(&mut self, user: String) {
        self.digested_user = Some(user);
    }
}
