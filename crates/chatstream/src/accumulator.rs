use std::collections::BTreeMap;
use uuid::Uuid;

use crate::models::message::ToolCallRequest;
use crate::providers::base::ToolCallFragment;

/// Collects streamed tool-call fragments into complete requests, keyed by the
/// slot index the backend assigned. Lives for exactly one stream.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: BTreeMap<usize, ToolCallRequest>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn absorb<I>(&mut self, fragments: I)
    where
        I: IntoIterator<Item = ToolCallFragment>,
    {
        for fragment in fragments {
            self.absorb_one(fragment);
        }
    }

    fn absorb_one(&mut self, fragment: ToolCallFragment) {
        match fragment {
            ToolCallFragment::Start { index, id, name } => {
                if self.calls.contains_key(&index) {
                    tracing::warn!(index, "tool call started twice, restarting entry");
                }
                self.calls
                    .insert(index, ToolCallRequest::new(id, name, String::new()));
            }
            ToolCallFragment::Delta {
                index,
                partial_json,
            } => match self.calls.get_mut(&index) {
                Some(call) => call.arguments.push_str(&partial_json),
                None => {
                    tracing::debug!(index, "dropping tool call delta with no matching start");
                }
            },
            ToolCallFragment::OpenAi {
                index,
                id,
                function_name,
                arguments_chunk,
            } => {
                // first sight of an index opens its entry
                let call = self
                    .calls
                    .entry(index)
                    .or_insert_with(|| ToolCallRequest::new("", "", ""));
                if let Some(id) = id {
                    if call.id.is_empty() {
                        call.id = id;
                    }
                }
                if let Some(name) = function_name {
                    if call.name.is_empty() {
                        call.name = name;
                    }
                }
                if let Some(chunk) = arguments_chunk {
                    call.arguments.push_str(&chunk);
                }
            }
        }
    }

    /// The completed calls in ascending slot order. Calls the backend never
    /// gave an id get a generated one so results can still be correlated.
    pub fn finalize(self) -> Vec<ToolCallRequest> {
        self.calls
            .into_values()
            .map(|mut call| {
                if call.id.is_empty() {
                    call.id = format!("call_{}", Uuid::new_v4().simple());
                }
                call
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn openai(index: usize, id: Option<&str>, name: Option<&str>, args: Option<&str>) -> ToolCallFragment {
        ToolCallFragment::OpenAi {
            index,
            id: id.map(String::from),
            function_name: name.map(String::from),
            arguments_chunk: args.map(String::from),
        }
    }

    fn delta(index: usize, partial_json: &str) -> ToolCallFragment {
        ToolCallFragment::Delta {
            index,
            partial_json: partial_json.to_string(),
        }
    }

    fn start(index: usize, id: &str, name: &str) -> ToolCallFragment {
        ToolCallFragment::Start {
            index,
            id: id.to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn test_openai_fragments_merge_by_index() {
        let mut accumulator = ToolCallAccumulator::new();
        accumulator.absorb(vec![openai(0, Some("a"), Some("f"), Some(r#"{"x":"#))]);
        accumulator.absorb(vec![openai(0, None, None, Some("1}"))]);

        assert_eq!(
            accumulator.finalize(),
            vec![ToolCallRequest::new("a", "f", r#"{"x":1}"#)]
        );
    }

    #[test]
    fn test_explicit_start_then_deltas() {
        let mut accumulator = ToolCallAccumulator::new();
        accumulator.absorb(vec![
            start(1, "toolu_1", "add_node"),
            delta(1, r#"{"text""#),
            delta(1, r#":"a"}"#),
        ]);

        assert_eq!(
            accumulator.finalize(),
            vec![ToolCallRequest::new("toolu_1", "add_node", r#"{"text":"a"}"#)]
        );
    }

    #[test]
    fn test_delta_without_start_is_dropped() {
        let mut accumulator = ToolCallAccumulator::new();
        accumulator.absorb(vec![delta(3, r#"{"orphan":true}"#)]);
        assert!(accumulator.is_empty());
        assert!(accumulator.finalize().is_empty());
    }

    #[test]
    fn test_interleaved_indices_match_isolated_feeding() {
        let per_index: Vec<Vec<ToolCallFragment>> = vec![
            vec![
                openai(0, Some("a"), Some("read_map"), Some("")),
                openai(0, None, None, Some("{}")),
            ],
            vec![
                openai(1, Some("b"), Some("add_node"), Some(r#"{"te"#)),
                openai(1, None, None, Some(r#"xt":"#)),
                openai(1, None, None, Some(r#""b"}"#)),
            ],
            vec![
                openai(2, Some("c"), Some("delete_node"), None),
                openai(2, None, None, Some(r#"{"uid":"#)),
                openai(2, None, None, Some(r#""n1"}"#)),
            ],
        ];

        let isolated: Vec<ToolCallRequest> = per_index
            .iter()
            .flat_map(|fragments| {
                let mut accumulator = ToolCallAccumulator::new();
                accumulator.absorb(fragments.clone());
                accumulator.finalize()
            })
            .collect();

        // deliver round-robin, highest index first in each round
        let mut interleaved = Vec::new();
        for round in 0..3 {
            for fragments in per_index.iter().rev() {
                if let Some(fragment) = fragments.get(round) {
                    interleaved.push(fragment.clone());
                }
            }
        }
        let mut accumulator = ToolCallAccumulator::new();
        accumulator.absorb(interleaved);
        let merged = accumulator.finalize();

        assert_eq!(merged, isolated);
        let ids: Vec<&str> = merged.iter().map(|call| call.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_missing_id_is_generated() {
        let mut accumulator = ToolCallAccumulator::new();
        accumulator.absorb(vec![openai(0, None, Some("read_map"), Some("{}"))]);
        let calls = accumulator.finalize();

        assert_eq!(calls.len(), 1);
        assert!(calls[0].id.starts_with("call_"));
        assert_eq!(calls[0].name, "read_map");
    }

    #[test]
    fn test_repeated_name_is_not_duplicated() {
        let mut accumulator = ToolCallAccumulator::new();
        accumulator.absorb(vec![
            openai(0, Some("a"), Some("f"), Some("{")),
            openai(0, Some("a"), Some("f"), Some("}")),
        ]);
        assert_eq!(
            accumulator.finalize(),
            vec![ToolCallRequest::new("a", "f", "{}")]
        );
    }
}
