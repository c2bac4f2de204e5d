//! Variable bindings captured during a recording session.
//!
//! A variable is bound the first time a step declares it and never changes
//! afterwards. Later declarations of the same name reuse the stored value
//! without prompting and without writing the vars file again.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{Result, StepMakerError};

/// Externally supplied defaults, consulted before prompting the operator
pub type ParamSet = HashMap<String, String>;

/// Source of values the operator types in by hand.
pub trait Prompter {
    /// Ask for the value of `name`. `None` means the operator cancelled.
    fn prompt_variable(&mut self, name: &str) -> Option<String>;
}

/// Outcome of resolving one name without operator interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Already bound for this session
    Bound(String),
    /// Found in the parameter set; not yet bound
    Default(String),
    /// Nobody knows the value; the operator must be asked
    PromptRequired,
}

/// Session-wide name -> value bindings, in first-introduction order.
#[derive(Debug, Clone, Default)]
pub struct VariableStore {
    values: HashMap<String, String>,
    order: Vec<String>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Bindings in the order they were introduced
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.order
            .iter()
            .filter_map(|name| self.values.get_key_value(name))
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Resolve `name` against the session bindings, then `defaults`.
    pub fn resolve(&self, name: &str, defaults: &ParamSet) -> Resolution {
        if let Some(value) = self.values.get(name) {
            Resolution::Bound(value.clone())
        } else if let Some(value) = defaults.get(name) {
            Resolution::Default(value.clone())
        } else {
            Resolution::PromptRequired
        }
    }

    /// Bind every pair whose name is not bound yet.
    ///
    /// Returns the pairs that were actually inserted; names that were already
    /// bound keep their original value.
    pub fn commit(&mut self, bindings: Vec<(String, String)>) -> Vec<(String, String)> {
        let mut inserted = Vec::with_capacity(bindings.len());
        for (name, value) in bindings {
            if self.values.contains_key(&name) {
                continue;
            }
            self.order.push(name.clone());
            self.values.insert(name.clone(), value.clone());
            inserted.push((name, value));
        }
        inserted
    }
}

/// Resolve every declared name of one step.
///
/// Priority, first match wins: bound in `store`, introduced earlier in this
/// same pass, present in `params`, typed by the operator. Returns the newly
/// introduced pairs in declaration order without touching `store`. A
/// cancelled prompt aborts the whole pass.
pub fn resolve_declarations<'a, I, P>(
    store: &VariableStore,
    names: I,
    params: &ParamSet,
    prompter: &mut P,
) -> Result<Vec<(String, String)>>
where
    I: IntoIterator<Item = &'a str>,
    P: Prompter + ?Sized,
{
    let mut introduced: Vec<(String, String)> = Vec::new();

    for name in names {
        if introduced.iter().any(|(n, _)| n == name) {
            continue;
        }
        match store.resolve(name, params) {
            Resolution::Bound(_) => {
                debug!("Variable '{}' already bound, reusing", name);
            }
            Resolution::Default(value) => {
                debug!("Variable '{}' taken from parameters", name);
                introduced.push((name.to_string(), value));
            }
            Resolution::PromptRequired => match prompter.prompt_variable(name) {
                Some(value) => introduced.push((name.to_string(), value)),
                None => return Err(StepMakerError::PromptCancelled(name.to_string())),
            },
        }
    }

    Ok(introduced)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Answers from a fixed list and counts how often it was asked.
    struct ScriptedPrompter {
        answers: Vec<Option<String>>,
        asked: Vec<String>,
    }

    impl ScriptedPrompter {
        fn new(answers: &[Option<&str>]) -> Self {
            Self {
                answers: answers.iter().rev().map(|a| a.map(String::from)).collect(),
                asked: Vec::new(),
            }
        }
    }

    impl Prompter for ScriptedPrompter {
        fn prompt_variable(&mut self, name: &str) -> Option<String> {
            self.asked.push(name.to_string());
            self.answers.pop().flatten()
        }
    }

    fn params(pairs: &[(&str, &str)]) -> ParamSet {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_resolve_priority() {
        let mut store = VariableStore::new();
        store.commit(vec![("user".into(), "root".into())]);
        let defaults = params(&[("user", "admin"), ("host", "vm1")]);

        assert_eq!(store.resolve("user", &defaults), Resolution::Bound("root".into()));
        assert_eq!(store.resolve("host", &defaults), Resolution::Default("vm1".into()));
        assert_eq!(store.resolve("pass", &defaults), Resolution::PromptRequired);
    }

    #[test]
    fn test_commit_never_overwrites() {
        let mut store = VariableStore::new();
        let first = store.commit(vec![("x".into(), "1".into())]);
        let second = store.commit(vec![("x".into(), "2".into()), ("y".into(), "3".into())]);

        assert_eq!(first, vec![("x".to_string(), "1".to_string())]);
        assert_eq!(second, vec![("y".to_string(), "3".to_string())]);
        assert_eq!(store.get("x"), Some("1"));
        assert_eq!(store.iter().collect::<Vec<_>>(), vec![("x", "1"), ("y", "3")]);
    }

    #[test]
    fn test_pass_prompts_once_for_duplicate_names() {
        let store = VariableStore::new();
        let mut prompter = ScriptedPrompter::new(&[Some("hello")]);

        let introduced =
            resolve_declarations(&store, ["x", "x"], &ParamSet::new(), &mut prompter).unwrap();

        assert_eq!(introduced, vec![("x".to_string(), "hello".to_string())]);
        assert_eq!(prompter.asked, vec!["x"]);
    }

    #[test]
    fn test_pass_skips_bound_and_adopts_params() {
        let mut store = VariableStore::new();
        store.commit(vec![("user".into(), "root".into())]);
        let defaults = params(&[("host", "vm1")]);
        let mut prompter = ScriptedPrompter::new(&[]);

        let introduced =
            resolve_declarations(&store, ["user", "host"], &defaults, &mut prompter).unwrap();

        assert_eq!(introduced, vec![("host".to_string(), "vm1".to_string())]);
        assert!(prompter.asked.is_empty());
    }

    #[test]
    fn test_pass_aborts_on_cancel() {
        let store = VariableStore::new();
        let mut prompter = ScriptedPrompter::new(&[Some("a"), None]);

        let err =
            resolve_declarations(&store, ["first", "second"], &ParamSet::new(), &mut prompter)
                .unwrap_err();

        assert!(matches!(err, StepMakerError::PromptCancelled(ref n) if n == "second"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_empty_answer_is_a_value() {
        let store = VariableStore::new();
        let mut prompter = ScriptedPrompter::new(&[Some("")]);
        let introduced =
            resolve_declarations(&store, ["blank"], &ParamSet::new(), &mut prompter).unwrap();
        assert_eq!(introduced, vec![("blank".to_string(), String::new())]);
    }
}
