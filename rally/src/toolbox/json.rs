use super::{ErrorListener, Listener};
use crate::{NetworkResponse, Parsed, RequestError, RequestHandler};
use rally_cache::parse_cache_headers;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;

/// Body decoded as JSON into `T`.
pub struct JsonHandler<T> {
    on_response: Listener<T>,
    on_error: ErrorListener,
    _output: PhantomData<fn() -> T>,
}

impl<T> JsonHandler<T>
where
    T: DeserializeOwned + Send + 'static,
{
    pub fn new(
        on_response: impl Fn(T) + Send + Sync + 'static,
        on_error: impl Fn(RequestError) + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_response: Box::new(on_response),
            on_error: Box::new(on_error),
            _output: PhantomData,
        }
    }
}

impl<T> RequestHandler for JsonHandler<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Output = T;

    fn parse_response(
        &self,
        response: &NetworkResponse,
    ) -> Result<Parsed<T>, RequestError> {
        let value = serde_json::from_slice(&response.data)
            .map_err(|e| RequestError::Parse(e.to_string()))?;
        Ok(Parsed::new(
            value,
            parse_cache_headers(&response.headers, &response.data),
        ))
    }

    fn deliver_response(&self, output: T) {
        (self.on_response)(output)
    }

    fn deliver_error(&self, error: RequestError) {
        (self.on_error)(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::HashMap;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Story {
        id: u64,
        title: String,
    }

    #[test]
    fn test_parse_json() {
        let handler = JsonHandler::<Story>::new(|_| {}, |_| {});
        let response = NetworkResponse::new(
            200,
            HashMap::new(),
            br#"{"id": 7, "title": "rally"}"#.to_vec(),
        );
        let parsed = handler.parse_response(&response).unwrap();
        assert_eq!(
            parsed.result,
            Story {
                id: 7,
                title: "rally".to_string()
            }
        );
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        let handler = JsonHandler::<Story>::new(|_| {}, |_| {});
        let response = NetworkResponse::new(200, HashMap::new(), b"{not json".to_vec());
        assert!(matches!(
            handler.parse_response(&response),
            Err(RequestError::Parse(_))
        ));
    }
}
