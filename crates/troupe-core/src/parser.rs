//! Tolerant decoding of provider replies.
//!
//! A reply is either one JSON document or several documents, one per line.
//! Every document must map actor handles to `{thoughts, answer}`. Any
//! undecodable line or malformed entry rejects the whole reply.

use serde_json::{Map, Value};
use troupe_schema::{child_pointer, ActorTurn, PropertyOrder, ACTOR_FIELDS, ROOT};

use crate::error::PipelineError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorReply {
    pub handle: String,
    pub thoughts: Vec<String>,
    pub answer: String,
}

/// All documents of one reply merged into a single mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedResponse {
    /// One entry per handle, at the position the handle was first seen.
    pub replies: Vec<ActorReply>,
    pub property_order: PropertyOrder,
}

impl ParsedResponse {
    /// Split into turns, each carrying only the order of its own handle.
    pub fn into_turns(self) -> Vec<ActorTurn> {
        let order = self.property_order;
        self.replies
            .into_iter()
            .map(|reply| {
                let scoped = order.scoped(&reply.handle);
                ActorTurn::new(reply.handle, reply.thoughts, reply.answer)
                    .with_property_order(scoped)
            })
            .collect()
    }

    fn merge(&mut self, later: ParsedResponse) {
        for reply in later.replies {
            match self.replies.iter_mut().find(|r| r.handle == reply.handle) {
                Some(existing) => *existing = reply,
                None => self.replies.push(reply),
            }
        }
        self.property_order.merge(later.property_order);
    }
}

pub fn parse_response(raw: &str) -> Result<ParsedResponse, PipelineError> {
    let documents = decode_documents(raw)?;

    let mut validated = Vec::with_capacity(documents.len());
    for document in &documents {
        validated.push(validate_document(document)?);
    }

    let mut merged = ParsedResponse::default();
    for document in validated {
        merged.merge(document);
    }
    Ok(merged)
}

fn decode_documents(raw: &str) -> Result<Vec<Value>, PipelineError> {
    if let Ok(value) = serde_json::from_str::<Value>(raw) {
        return Ok(vec![value]);
    }

    let lines: Vec<&str> = raw.lines().filter(|line| !line.trim().is_empty()).collect();
    if lines.is_empty() {
        return Err(PipelineError::Parse {
            raw: raw.to_string(),
        });
    }

    lines
        .into_iter()
        .map(|line| {
            serde_json::from_str::<Value>(line).map_err(|_| PipelineError::Parse {
                raw: raw.to_string(),
            })
        })
        .collect()
}

fn validate_document(document: &Value) -> Result<ParsedResponse, PipelineError> {
    let Value::Object(entries) = document else {
        return Err(PipelineError::validation(format!(
            "expected an object of actor handles, got {}",
            kind_of(document)
        )));
    };

    let mut property_order = PropertyOrder::capture(document);
    let mut replies = Vec::with_capacity(entries.len());
    for (handle, entry) in entries {
        replies.push(validate_entry(handle, entry)?);
        property_order.retain_keys(&child_pointer(ROOT, handle), |key| {
            ACTOR_FIELDS.contains(&key)
        });
    }

    Ok(ParsedResponse {
        replies,
        property_order,
    })
}

fn validate_entry(handle: &str, entry: &Value) -> Result<ActorReply, PipelineError> {
    let Value::Object(fields) = entry else {
        return Err(PipelineError::validation(format!(
            "entry for {handle} is {}, expected an object",
            kind_of(entry)
        )));
    };

    let thoughts = match field(fields, handle, "thoughts")? {
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(thought) => Ok(thought.clone()),
                other => Err(PipelineError::validation(format!(
                    "thought of {handle} is {}, expected a string",
                    kind_of(other)
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?,
        other => {
            return Err(PipelineError::validation(format!(
                "thoughts of {handle} is {}, expected a list",
                kind_of(other)
            )))
        }
    };

    let answer = match field(fields, handle, "answer")? {
        Value::String(answer) => answer.clone(),
        other => {
            return Err(PipelineError::validation(format!(
                "answer of {handle} is {}, expected a string",
                kind_of(other)
            )))
        }
    };

    Ok(ActorReply {
        handle: handle.to_string(),
        thoughts,
        answer,
    })
}

fn field<'a>(
    fields: &'a Map<String, Value>,
    handle: &str,
    name: &str,
) -> Result<&'a Value, PipelineError> {
    fields
        .get(name)
        .ok_or_else(|| PipelineError::validation(format!("entry for {handle} lacks {name}")))
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::actor_payload;

    fn strings(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn single_document_keeps_handle_order() {
        let parsed = parse_response(
            r#"{"Mary":{"thoughts":["m"],"answer":"hi"},"Josh":{"thoughts":[],"answer":""}}"#,
        )
        .unwrap();
        let handles: Vec<&str> = parsed.replies.iter().map(|r| r.handle.as_str()).collect();
        assert_eq!(handles, vec!["Mary", "Josh"]);
        assert_eq!(parsed.replies[0].thoughts, strings(&["m"]));
        assert_eq!(parsed.replies[1].answer, "");
    }

    #[test]
    fn pretty_printed_document_parses_whole() {
        let raw = "{\n\"Josh\": {\n\"thoughts\": [\"a\", \"b\", \"c\"],\n\"answer\": \"x\"\n}\n}\n";
        let parsed = parse_response(raw).unwrap();
        assert_eq!(parsed.replies.len(), 1);
        assert_eq!(parsed.replies[0].thoughts.len(), 3);
    }

    #[test]
    fn later_document_wins_for_same_handle() {
        let raw = "{\"Josh\":{\"thoughts\":[\"a\"],\"answer\":\"x\"}}\n{\"Josh\":{\"thoughts\":[\"b\"],\"answer\":\"y\"}}";
        let parsed = parse_response(raw).unwrap();
        assert_eq!(
            parsed.replies,
            vec![ActorReply {
                handle: "Josh".into(),
                thoughts: strings(&["b"]),
                answer: "y".into(),
            }]
        );
    }

    #[test]
    fn merge_keeps_handles_unique_to_earlier_documents() {
        let raw = concat!(
            "{\"Josh\":{\"thoughts\":[\"a\"],\"answer\":\"x\"},\"Mary\":{\"thoughts\":[],\"answer\":\"m\"}}\n",
            "\n",
            "{\"Josh\":{\"answer\":\"y\",\"thoughts\":[\"b\"]}}\n",
        );
        let parsed = parse_response(raw).unwrap();
        let handles: Vec<&str> = parsed.replies.iter().map(|r| r.handle.as_str()).collect();
        assert_eq!(handles, vec!["Josh", "Mary"]);
        assert_eq!(parsed.replies[0].answer, "y");
        assert_eq!(parsed.replies[1].answer, "m");
        // order for Josh comes from the later document
        assert_eq!(
            parsed.property_order.keys_at("/Josh").unwrap(),
            strings(&["answer", "thoughts"]).as_slice()
        );
        assert_eq!(
            parsed.property_order.keys_at("").unwrap(),
            strings(&["Josh", "Mary"]).as_slice()
        );
    }

    #[test]
    fn any_undecodable_line_rejects_everything() {
        let raw = "{\"Josh\":{\"thoughts\":[],\"answer\":\"x\"}}\nnot json";
        assert!(matches!(
            parse_response(raw),
            Err(PipelineError::Parse { .. })
        ));
        assert!(matches!(
            parse_response("not json at all"),
            Err(PipelineError::Parse { raw }) if raw == "not json at all"
        ));
        assert!(matches!(parse_response(""), Err(PipelineError::Parse { .. })));
        assert!(matches!(parse_response("\n \n"), Err(PipelineError::Parse { .. })));
    }

    #[test]
    fn any_invalid_document_rejects_everything() {
        let raw = "{\"Josh\":{\"thoughts\":[],\"answer\":\"x\"}}\n{\"Mary\":{\"thoughts\":\"one\",\"answer\":\"y\"}}";
        let err = parse_response(raw).unwrap_err();
        assert!(matches!(err, PipelineError::Validation { .. }));
        assert!(err.to_string().contains("thoughts of Mary"));
    }

    #[test]
    fn shape_violations_are_validation_errors() {
        for raw in [
            r#"["Josh"]"#,
            r#""hello""#,
            r#"{"Josh":"hello"}"#,
            r#"{"Josh":{"thoughts":[]}}"#,
            r#"{"Josh":{"answer":"x"}}"#,
            r#"{"Josh":{"thoughts":[1],"answer":"x"}}"#,
            r#"{"Josh":{"thoughts":[],"answer":null}}"#,
        ] {
            assert!(
                matches!(parse_response(raw), Err(PipelineError::Validation { .. })),
                "{raw} should fail validation"
            );
        }
    }

    #[test]
    fn extra_keys_are_tolerated_and_dropped_from_order() {
        let raw = r#"{"Josh":{"messageId":"id-1","thoughts":["a"],"meta":{"k":1},"answer":"x"}}"#;
        let parsed = parse_response(raw).unwrap();
        assert_eq!(parsed.replies[0].answer, "x");
        assert_eq!(
            parsed.property_order.keys_at("/Josh").unwrap(),
            strings(&["thoughts", "answer"]).as_slice()
        );
        assert!(parsed.property_order.keys_at("/Josh/meta").is_none());
    }

    #[test]
    fn empty_object_is_a_valid_reply_with_no_actors() {
        let parsed = parse_response("{}").unwrap();
        assert!(parsed.replies.is_empty());
        assert!(parsed.into_turns().is_empty());
    }

    #[test]
    fn turns_carry_only_their_own_order() {
        let raw = r#"{"Josh":{"answer":"x","thoughts":[]},"Mary":{"thoughts":[],"answer":"y"}}"#;
        let turns = parse_response(raw).unwrap().into_turns();
        assert_eq!(turns.len(), 2);
        let josh = &turns[0].property_order;
        assert_eq!(josh.keys_at("").unwrap(), strings(&["Josh"]).as_slice());
        assert!(josh.keys_at("/Mary").is_none());
        assert_eq!(
            turns[1].property_order.keys_at("/Mary").unwrap(),
            strings(&["thoughts", "answer"]).as_slice()
        );
    }

    #[test]
    fn serialized_turn_reparses_with_identical_order() {
        let raw = r#"{"Josh":{"answer":"x","thoughts":["a","b"]}}"#;
        let turn = parse_response(raw).unwrap().into_turns().remove(0);
        let replayed = actor_payload(&turn);
        assert_eq!(replayed, raw);

        let again = parse_response(&replayed).unwrap();
        assert_eq!(
            again.property_order.keys_at("/Josh"),
            turn.property_order.keys_at("/Josh")
        );
    }
}
