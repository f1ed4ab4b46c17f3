use crate::config::{PersonaConfig, TroupeConfig};

/// Handles the provider is allowed to speak for, in configured order.
#[derive(Debug, Clone, Default)]
pub struct ActorRegistry {
    actors: Vec<PersonaConfig>,
}

impl ActorRegistry {
    pub fn new(actors: Vec<PersonaConfig>) -> Self {
        Self { actors }
    }

    pub fn from_config(config: &TroupeConfig) -> Self {
        Self::new(config.actors.clone())
    }

    pub fn contains(&self, handle: &str) -> bool {
        self.actors.iter().any(|a| a.handle == handle)
    }

    pub fn handles(&self) -> Vec<&str> {
        self.actors.iter().map(|a| a.handle.as_str()).collect()
    }

    pub fn personas(&self) -> &[PersonaConfig] {
        &self.actors
    }
}

/// Human participants known to the conversation.
#[derive(Debug, Clone, Default)]
pub struct ParticipantRegistry {
    participants: Vec<PersonaConfig>,
}

impl ParticipantRegistry {
    pub fn new(participants: Vec<PersonaConfig>) -> Self {
        Self { participants }
    }

    pub fn from_config(config: &TroupeConfig) -> Self {
        Self::new(config.main.participants.clone())
    }

    pub fn contains(&self, handle: &str) -> bool {
        self.participants.iter().any(|p| p.handle == handle)
    }

    pub fn personas(&self) -> &[PersonaConfig] {
        &self.participants
    }

    pub fn first_handle(&self) -> Option<&str> {
        self.participants.first().map(|p| p.handle.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn persona(handle: &str) -> PersonaConfig {
        PersonaConfig {
            handle: handle.into(),
            description: format!("{handle} description"),
        }
    }

    #[test]
    fn actor_membership_is_exact() {
        let registry = ActorRegistry::new(vec![persona("Josh"), persona("Mary")]);
        assert!(registry.contains("Josh"));
        assert!(!registry.contains("josh"));
        assert!(!registry.contains("Bobby"));
        assert_eq!(registry.handles(), vec!["Josh", "Mary"]);
    }

    #[test]
    fn participants_are_separate_from_actors() {
        let actors = ActorRegistry::new(vec![persona("Josh")]);
        let participants = ParticipantRegistry::new(vec![persona("Igor"), persona("Bobby")]);
        assert!(!actors.contains("Igor"));
        assert!(participants.contains("Igor"));
        assert_eq!(participants.first_handle(), Some("Igor"));
        assert_eq!(ParticipantRegistry::default().first_handle(), None);
    }
}
