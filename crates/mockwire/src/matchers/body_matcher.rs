//! Body-type aware evaluation for [`ValueMatcher`].
//!
//! Object matchers (`NotNullOrEmptyMatcher`, `ExactObjectMatcher`) work on raw
//! bytes when the body is binary. JSON matchers use the parsed document when
//! there is one and parse text otherwise. Plain string matchers only see
//! decoded text for JSON, string and form bodies.

use super::error::MatcherError;
use super::score::MatchResult;
use super::value_matcher::ValueMatcher;
use crate::message::{BodyData, BodyType, BodyValue};

impl ValueMatcher {
    pub fn score_body(&self, body: &BodyData) -> MatchResult {
        let kind = self.kind();
        let body_type = body.body_type();

        if body_type == BodyType::None {
            return self.missing();
        }

        if kind.is_object_matcher() {
            return match &body.value {
                BodyValue::Bytes(bytes) | BodyValue::ProtoBuf(bytes) => self.score_bytes(bytes),
                BodyValue::String(_) | BodyValue::Json(_) | BodyValue::FormUrlEncoded(_) => {
                    match body.raw.as_ref() {
                        Some(raw) => self.score_bytes(raw),
                        None => self.score_text(body.as_text().as_deref()),
                    }
                }
                BodyValue::MultiPart(_) => self.score_bytes(&body.to_bytes()),
                _ => self.unsupported(body_type),
            };
        }

        if kind.is_json_matcher() || self.wants_json() {
            return match &body.value {
                BodyValue::Json(json) => self.score_json(json),
                BodyValue::String(_) | BodyValue::FormUrlEncoded(_) => {
                    self.score_text(body.as_text().as_deref())
                }
                BodyValue::Bytes(bytes) => self.score_bytes(bytes),
                _ => self.unsupported(body_type),
            };
        }

        match body_type {
            BodyType::Json | BodyType::String | BodyType::FormUrlEncoded => {
                self.score_text(body.as_text().as_deref())
            }
            _ => self.unsupported(body_type),
        }
    }

    fn unsupported(&self, body_type: BodyType) -> MatchResult {
        MatchResult::faulted(MatcherError::UnsupportedBody {
            matcher: self.kind().name(),
            body_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::matchers::{MatcherError, MatcherSpec, ValueMatcher};
    use crate::message::BodyData;
    use bytes::Bytes;
    use serde_json::json;

    fn compile(spec: MatcherSpec) -> ValueMatcher {
        ValueMatcher::compile(&spec).unwrap()
    }

    #[test]
    fn test_string_matcher_on_json_body_uses_text() {
        let body = BodyData::detect(
            Bytes::from_static(br#"{"name":"widget"}"#),
            Some("application/json"),
            None,
        );
        let m = compile(MatcherSpec::wildcard("*widget*"));
        assert!(m.score_body(&body).is_perfect());
    }

    #[test]
    fn test_json_matcher_on_json_body() {
        let body = BodyData::from_json(json!({"name": "widget", "qty": 2}));
        assert!(compile(MatcherSpec::json_partial(json!({"qty": 2})))
            .score_body(&body)
            .is_perfect());
        assert_eq!(
            compile(MatcherSpec::json(json!({"qty": 2}))).score_body(&body).score,
            0.0
        );
    }

    #[test]
    fn test_string_matcher_on_binary_body_faults() {
        let body = BodyData::from_bytes(vec![0u8, 159, 146, 150]);
        let result = compile(MatcherSpec::regex(".*")).score_body(&body);
        assert_eq!(result.score, 0.0);
        assert!(matches!(
            result.fault,
            Some(MatcherError::UnsupportedBody { .. })
        ));
    }

    #[test]
    fn test_exact_object_on_binary_body() {
        let payload = [0u8, 1, 2, 255];
        let body = BodyData::from_bytes(payload.to_vec());
        assert!(compile(MatcherSpec::exact_object(&payload))
            .score_body(&body)
            .is_perfect());
        assert_eq!(
            compile(MatcherSpec::exact_object(&[9u8]))
                .score_body(&body)
                .score,
            0.0
        );
    }

    #[test]
    fn test_not_null_or_empty() {
        let m = compile(MatcherSpec::not_null_or_empty());
        assert!(m.score_body(&BodyData::from_string("x")).is_perfect());
        assert!(m.score_body(&BodyData::from_bytes(vec![1u8])).is_perfect());
        assert_eq!(m.score_body(&BodyData::none()).score, 0.0);
    }

    #[test]
    fn test_xpath_on_string_body() {
        let body = BodyData::from_string("<a><b>1</b></a>").with_content_type("text/xml");
        assert!(compile(MatcherSpec::xpath("/a/b[text()='1']"))
            .score_body(&body)
            .is_perfect());
    }
}
