use crate::errors::StructuralError;
use crate::types::{Action, Step};
use std::collections::HashMap;
use tracing::debug;

/// Pairing of every `whileBegin` with its `whileEnd`, built by the same pass
/// that validates the sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopIndex {
    end_of: HashMap<usize, usize>,
    begin_of: HashMap<usize, usize>,
}

impl LoopIndex {
    pub fn build(actions: &[Action]) -> Result<Self, StructuralError> {
        let mut stack: Vec<usize> = Vec::new();
        let mut index = LoopIndex::default();

        for (i, action) in actions.iter().enumerate() {
            match action.step {
                Step::WhileBegin(_) => stack.push(i),
                Step::WhileEnd => {
                    let begin = stack
                        .pop()
                        .ok_or(StructuralError::UnmatchedLoopEnd { index: i })?;
                    index.end_of.insert(begin, i);
                    index.begin_of.insert(i, begin);
                }
                Step::Break { .. } if stack.is_empty() => {
                    return Err(StructuralError::BreakOutsideLoop { index: i });
                }
                _ => {}
            }
        }

        if let Some(&open) = stack.last() {
            return Err(StructuralError::UnclosedLoopBegin { index: open });
        }

        Ok(index)
    }

    /// Index of the `whileEnd` closing the loop opened at `begin`.
    pub fn end_of(&self, begin: usize) -> Option<usize> {
        self.end_of.get(&begin).copied()
    }

    /// Index of the `whileBegin` opening the loop closed at `end`.
    pub fn begin_of(&self, end: usize) -> Option<usize> {
        self.begin_of.get(&end).copied()
    }

    pub fn loop_count(&self) -> usize {
        self.end_of.len()
    }
}

/// Checks loop markers and breaks are well formed.
pub fn validate(actions: &[Action]) -> Result<(), StructuralError> {
    let index = LoopIndex::build(actions)?;
    debug!(
        actions = actions.len(),
        loops = index.loop_count(),
        "action sequence is well formed"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Condition, LoopSpec, Operator, ReadAttribute, Threshold};

    fn begin() -> Action {
        Action::new(Step::WhileBegin(LoopSpec {
            condition: Condition {
                selector: ".row".to_string(),
                attribute: ReadAttribute::Count,
                operator: Operator::Less,
                threshold: Threshold::Number(3.0),
            },
            max_iterations: None,
        }))
    }

    fn end() -> Action {
        Action::new(Step::WhileEnd)
    }

    fn brk() -> Action {
        Action::new(Step::Break { condition: None })
    }

    fn log() -> Action {
        Action::new(Step::Log {
            message: "tick".to_string(),
        })
    }

    #[test]
    fn test_accepts_nested_loops() {
        let actions = vec![begin(), log(), begin(), brk(), end(), brk(), end(), log()];
        let index = LoopIndex::build(&actions).unwrap();
        assert_eq!(index.end_of(0), Some(6));
        assert_eq!(index.end_of(2), Some(4));
        assert_eq!(index.begin_of(4), Some(2));
        assert_eq!(index.begin_of(6), Some(0));
        assert!(validate(&actions).is_ok());
    }

    #[test]
    fn test_accepts_flat_sequence() {
        assert!(validate(&[log(), log()]).is_ok());
        assert!(validate(&[]).is_ok());
    }

    #[test]
    fn test_rejects_loop_end_without_begin() {
        let actions = vec![log(), end(), begin(), end()];
        assert_eq!(
            validate(&actions),
            Err(StructuralError::UnmatchedLoopEnd { index: 1 })
        );

        let actions = vec![begin(), end(), end()];
        assert_eq!(
            validate(&actions),
            Err(StructuralError::UnmatchedLoopEnd { index: 2 })
        );
    }

    #[test]
    fn test_rejects_unclosed_begin() {
        let actions = vec![begin(), log(), begin(), end()];
        assert_eq!(
            validate(&actions),
            Err(StructuralError::UnclosedLoopBegin { index: 0 })
        );
    }

    #[test]
    fn test_rejects_break_outside_loop() {
        let actions = vec![log(), brk()];
        let err = validate(&actions).unwrap_err();
        assert_eq!(err, StructuralError::BreakOutsideLoop { index: 1 });
        assert_eq!(err.index(), 1);

        let actions = vec![begin(), end(), brk()];
        assert_eq!(
            validate(&actions),
            Err(StructuralError::BreakOutsideLoop { index: 2 })
        );
    }
}
