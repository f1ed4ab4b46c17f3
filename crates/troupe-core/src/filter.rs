use troupe_schema::ActorTurn;

use crate::registry::ActorRegistry;

/// Keep turns whose handle is a registered actor, in their original order.
///
/// Anything else is a provider hallucination (often a human participant's
/// handle) and is dropped. Dropped handles are returned for diagnostics.
pub fn filter_known_actors(
    turns: Vec<ActorTurn>,
    registry: &ActorRegistry,
) -> (Vec<ActorTurn>, Vec<String>) {
    let mut kept = Vec::with_capacity(turns.len());
    let mut dropped = Vec::new();
    for turn in turns {
        if registry.contains(&turn.handle) {
            kept.push(turn);
        } else {
            tracing::debug!(handle = %turn.handle, "dropping reply for unknown handle");
            dropped.push(turn.handle);
        }
    }
    (kept, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PersonaConfig;

    fn registry(handles: &[&str]) -> ActorRegistry {
        ActorRegistry::new(
            handles
                .iter()
                .map(|h| PersonaConfig {
                    handle: h.to_string(),
                    description: String::new(),
                })
                .collect(),
        )
    }

    fn turn(handle: &str) -> ActorTurn {
        ActorTurn::new(handle, vec!["t".into()], "a")
    }

    #[test]
    fn unknown_handles_are_dropped() {
        let (kept, dropped) =
            filter_known_actors(vec![turn("Mary"), turn("Bobby")], &registry(&["Josh", "Mary"]));
        assert_eq!(kept, vec![turn("Mary")]);
        assert_eq!(dropped, vec!["Bobby".to_string()]);
    }

    #[test]
    fn relative_order_is_preserved() {
        let (kept, _) = filter_known_actors(
            vec![turn("Mary"), turn("Igor"), turn("Josh")],
            &registry(&["Josh", "Mary"]),
        );
        let handles: Vec<&str> = kept.iter().map(|t| t.handle.as_str()).collect();
        assert_eq!(handles, vec!["Mary", "Josh"]);
    }

    #[test]
    fn all_unknown_yields_empty() {
        let (kept, dropped) = filter_known_actors(vec![turn("Igor")], &registry(&["Josh"]));
        assert!(kept.is_empty());
        assert_eq!(dropped.len(), 1);
    }
}
