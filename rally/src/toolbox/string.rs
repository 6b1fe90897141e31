use super::{ErrorListener, Listener};
use crate::{NetworkResponse, Parsed, RequestError, RequestHandler};
use rally_cache::{parse_cache_headers, parse_charset};

const DEFAULT_CHARSET: &str = "ISO-8859-1";

/// Body decoded with the charset named in `Content-Type`.
pub struct StringHandler {
    on_response: Listener<String>,
    on_error: ErrorListener,
}

impl StringHandler {
    pub fn new(
        on_response: impl Fn(String) + Send + Sync + 'static,
        on_error: impl Fn(RequestError) + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_response: Box::new(on_response),
            on_error: Box::new(on_error),
        }
    }
}

pub(crate) fn decode_body(data: &[u8], charset: &str) -> String {
    let charset = charset.to_ascii_lowercase();
    match charset.as_str() {
        "iso-8859-1" | "latin1" | "latin-1" | "us-ascii" => {
            data.iter().map(|&byte| char::from(byte)).collect()
        }
        _ => String::from_utf8_lossy(data).into_owned(),
    }
}

impl RequestHandler for StringHandler {
    type Output = String;

    fn parse_response(
        &self,
        response: &NetworkResponse,
    ) -> Result<Parsed<String>, RequestError> {
        let charset = parse_charset(&response.headers, DEFAULT_CHARSET);
        Ok(Parsed::new(
            decode_body(&response.data, &charset),
            parse_cache_headers(&response.headers, &response.data),
        ))
    }

    fn deliver_response(&self, output: String) {
        (self.on_response)(output)
    }

    fn deliver_error(&self, error: RequestError) {
        (self.on_error)(error)
    }
}
