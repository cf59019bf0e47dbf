use crate::request::Request;

/// Incremental decoder for `application/x-www-form-urlencoded` bodies.
///
/// Chunks arrive in whatever sizes the wire delivers, so a `key=value` pair
/// may be split anywhere. Completed pairs are emitted as request arguments
/// as soon as their terminating `&` shows up; the tail is carried until the
/// next chunk or [`FormDecoder::finish`].
pub(crate) struct FormDecoder {
    carry: Vec<u8>,
}

impl FormDecoder {
    pub(crate) fn new() -> Self {
        Self { carry: Vec::new() }
    }

    pub(crate) fn feed(&mut self, chunk: &[u8], request: &mut Request) {
        self.carry.extend_from_slice(chunk);
        while let Some(pos) = self.carry.iter().position(|&b| b == b'&') {
            let pair: Vec<u8> = self.carry.drain(..=pos).collect();
            Self::emit(&pair[..pair.len() - 1], request);
        }
    }

    pub(crate) fn finish(&mut self, request: &mut Request) {
        if !self.carry.is_empty() {
            let pair = std::mem::take(&mut self.carry);
            Self::emit(&pair, request);
        }
    }

    fn emit(pair: &[u8], request: &mut Request) {
        if pair.is_empty() {
            return;
        }
        for (key, value) in url::form_urlencoded::parse(pair) {
            request.set_arg(&key, &value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_escaped_fields() {
        let mut req = Request::new();
        let mut form = FormDecoder::new();
        form.feed(b"k=v%20w&k2=z", &mut req);
        form.finish(&mut req);
        assert_eq!(req.arg("k"), Some("v w"));
        assert_eq!(req.arg("k2"), Some("z"));
    }

    #[test]
    fn pairs_split_across_chunks() {
        let mut req = Request::new();
        let mut form = FormDecoder::new();
        form.feed(b"name=po", &mut req);
        form.feed(b"rtico&lan", &mut req);
        form.feed(b"g=rust", &mut req);
        form.finish(&mut req);
        assert_eq!(req.arg("name"), Some("portico"));
        assert_eq!(req.arg("lang"), Some("rust"));
    }

    #[test]
    fn plus_decodes_to_space() {
        let mut req = Request::new();
        let mut form = FormDecoder::new();
        form.feed(b"q=a+b", &mut req);
        form.finish(&mut req);
        assert_eq!(req.arg("q"), Some("a b"));
    }

    #[test]
    fn empty_body_emits_nothing() {
        let mut req = Request::new();
        let mut form = FormDecoder::new();
        form.finish(&mut req);
        assert!(req.args().is_empty());
    }
}
