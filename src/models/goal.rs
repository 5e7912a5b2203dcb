use serde::{Deserialize, Serialize};

pub type GoalId = u64;

/// Something the user wants time for this week. Goals live only as long as
/// the session; they are never written to the event store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goal {
    pub id: GoalId,
    pub text: String,
}

#[derive(Debug, Default)]
pub struct GoalList {
    goals: Vec<Goal>,
    next_id: GoalId,
}

impl GoalList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a goal; blank input is ignored.
    pub fn add(&mut self, text: &str) -> Option<Goal> {
        if text.trim().is_empty() {
            return None;
        }
        self.next_id += 1;
        let goal = Goal {
            id: self.next_id,
            text: text.to_string(),
        };
        self.goals.push(goal.clone());
        Some(goal)
    }

    pub fn remove(&mut self, id: GoalId) -> bool {
        let before = self.goals.len();
        self.goals.retain(|goal| goal.id != id);
        self.goals.len() != before
    }

    pub fn list(&self) -> &[Goal] {
        &self.goals
    }

    pub fn texts(&self) -> Vec<String> {
        self.goals.iter().map(|goal| goal.text.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_skips_blank_and_remove_by_id() {
        let mut goals = GoalList::new();
        assert!(goals.add("   ").is_none());
        let first = goals.add("learn rust").unwrap();
        let second = goals.add("run 5k").unwrap();
        assert_ne!(first.id, second.id);

        assert!(goals.remove(first.id));
        assert!(!goals.remove(first.id));
        assert_eq!(goals.texts(), vec!["run 5k".to_string()]);
    }
}
