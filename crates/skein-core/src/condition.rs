use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::context::{ContextKey, WorkflowContext};
use crate::state::GraphWorkflowState;

type StatePredicate<S> = Arc<dyn Fn(&GraphWorkflowState<S>) -> bool + Send + Sync>;
type ContextPredicate = Arc<dyn Fn(&WorkflowContext) -> bool + Send + Sync>;

/// Predicate gating whether an edge may be traversed.
///
/// Conditions form an immutable tree; combinators wrap their operands in
/// `Arc` so sub-conditions can be shared between many edges.
pub enum EdgeCondition<S> {
    Always,
    Never,
    /// Arbitrary predicate over the whole state.
    Conditional {
        predicate: StatePredicate<S>,
        description: String,
    },
    /// Predicate over one context key. An absent key evaluates to `false`.
    ContextBased {
        key: String,
        predicate: ContextPredicate,
        description: String,
    },
    And(Arc<EdgeCondition<S>>, Arc<EdgeCondition<S>>),
    Or(Arc<EdgeCondition<S>>, Arc<EdgeCondition<S>>),
    Not(Arc<EdgeCondition<S>>),
}

impl<S> EdgeCondition<S> {
    pub fn always() -> Self {
        Self::Always
    }

    pub fn never() -> Self {
        Self::Never
    }

    /// Condition over the full state.
    pub fn when<F>(description: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&GraphWorkflowState<S>) -> bool + Send + Sync + 'static,
    {
        Self::Conditional {
            predicate: Arc::new(predicate),
            description: description.into(),
        }
    }

    /// Condition over a typed context value.
    pub fn when_context<T, F>(
        key: &ContextKey<T>,
        description: impl Into<String>,
        predicate: F,
    ) -> Self
    where
        T: DeserializeOwned + 'static,
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let typed = key.clone();
        Self::ContextBased {
            key: key.name().to_string(),
            predicate: Arc::new(move |ctx: &WorkflowContext| {
                ctx.get(&typed).is_some_and(|v| predicate(&v))
            }),
            description: description.into(),
        }
    }

    pub fn when_context_present<T>(key: &ContextKey<T>) -> Self {
        let name = key.name().to_string();
        Self::ContextBased {
            key: name.clone(),
            predicate: Arc::new(move |ctx: &WorkflowContext| ctx.contains(&name)),
            description: format!("{} is present", key.name()),
        }
    }

    pub fn when_context_equals<T>(key: &ContextKey<T>, expected: T) -> Self
    where
        T: Serialize + DeserializeOwned + PartialEq + fmt::Debug + Send + Sync + 'static,
    {
        let description = format!("{} == {:?}", key.name(), expected);
        Self::when_context(key, description, move |v: &T| *v == expected)
    }

    /// `value > threshold`, comparing as `f64`. Non-numeric values never match.
    pub fn when_context_greater_than<T>(key: &ContextKey<T>, threshold: impl Into<f64>) -> Self {
        let threshold = threshold.into();
        Self::numeric(key, format!("{} > {}", key.name(), threshold), move |v| {
            v > threshold
        })
    }

    /// `value < threshold`, comparing as `f64`. Non-numeric values never match.
    pub fn when_context_less_than<T>(key: &ContextKey<T>, threshold: impl Into<f64>) -> Self {
        let threshold = threshold.into();
        Self::numeric(key, format!("{} < {}", key.name(), threshold), move |v| {
            v < threshold
        })
    }

    fn numeric<T>(
        key: &ContextKey<T>,
        description: String,
        compare: impl Fn(f64) -> bool + Send + Sync + 'static,
    ) -> Self {
        let name = key.name().to_string();
        Self::ContextBased {
            key: name.clone(),
            predicate: Arc::new(move |ctx: &WorkflowContext| {
                ctx.get_raw(&name)
                    .and_then(serde_json::Value::as_f64)
                    .is_some_and(&compare)
            }),
            description,
        }
    }

    pub fn and(self, other: EdgeCondition<S>) -> Self {
        Self::And(Arc::new(self), Arc::new(other))
    }

    pub fn or(self, other: EdgeCondition<S>) -> Self {
        Self::Or(Arc::new(self), Arc::new(other))
    }

    /// Combine with an already shared sub-condition.
    pub fn and_shared(self, other: &Arc<EdgeCondition<S>>) -> Self {
        Self::And(Arc::new(self), Arc::clone(other))
    }

    pub fn or_shared(self, other: &Arc<EdgeCondition<S>>) -> Self {
        Self::Or(Arc::new(self), Arc::clone(other))
    }

    pub fn negate(self) -> Self {
        Self::Not(Arc::new(self))
    }

    pub fn evaluate(&self, state: &GraphWorkflowState<S>) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::Conditional { predicate, .. } => predicate(state),
            Self::ContextBased { predicate, .. } => predicate(state.context()),
            Self::And(a, b) => a.evaluate(state) && b.evaluate(state),
            Self::Or(a, b) => a.evaluate(state) || b.evaluate(state),
            Self::Not(c) => !c.evaluate(state),
        }
    }

    /// Human-readable rendering, derived only from the tree's structure.
    pub fn description(&self) -> String {
        match self {
            Self::Always => "always".into(),
            Self::Never => "never".into(),
            Self::Conditional { description, .. } => description.clone(),
            Self::ContextBased { description, .. } => description.clone(),
            Self::And(a, b) => format!("({} AND {})", a.description(), b.description()),
            Self::Or(a, b) => format!("({} OR {})", a.description(), b.description()),
            Self::Not(c) => format!("NOT {}", c.description()),
        }
    }

    pub fn is_always(&self) -> bool {
        matches!(self, Self::Always)
    }
}

impl<S> Default for EdgeCondition<S> {
    fn default() -> Self {
        Self::Always
    }
}

impl<S> Clone for EdgeCondition<S> {
    fn clone(&self) -> Self {
        match self {
            Self::Always => Self::Always,
            Self::Never => Self::Never,
            Self::Conditional {
                predicate,
                description,
            } => Self::Conditional {
                predicate: Arc::clone(predicate),
                description: description.clone(),
            },
            Self::ContextBased {
                key,
                predicate,
                description,
            } => Self::ContextBased {
                key: key.clone(),
                predicate: Arc::clone(predicate),
                description: description.clone(),
            },
            Self::And(a, b) => Self::And(Arc::clone(a), Arc::clone(b)),
            Self::Or(a, b) => Self::Or(Arc::clone(a), Arc::clone(b)),
            Self::Not(c) => Self::Not(Arc::clone(c)),
        }
    }
}

impl<S> std::ops::Not for EdgeCondition<S> {
    type Output = EdgeCondition<S>;

    fn not(self) -> Self::Output {
        self.negate()
    }
}

impl<S> fmt::Debug for EdgeCondition<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EdgeCondition")
            .field(&self.description())
            .finish()
    }
}

impl<S> fmt::Display for EdgeCondition<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{NodeId, WorkflowId};

    fn state_with(ctx: WorkflowContext) -> GraphWorkflowState<i32> {
        GraphWorkflowState::initial(
            WorkflowId::new("wf").unwrap(),
            10,
            ctx,
            NodeId::new("a").unwrap(),
        )
    }

    #[test]
    fn test_evaluates_over_payloads_without_clone() {
        struct Opaque;

        let key: ContextKey<String> = ContextKey::new("region");
        let context = WorkflowContext::new().put(&key, "eu".to_string()).unwrap();
        let s = GraphWorkflowState::initial(
            WorkflowId::new("wf").unwrap(),
            Opaque,
            context,
            NodeId::new("start").unwrap(),
        );
        assert!(EdgeCondition::<Opaque>::when_context_present(&key).evaluate(&s));
        assert!(!EdgeCondition::<Opaque>::when_context_present(&key).negate().evaluate(&s));
    }

    #[test]
    fn test_always_and_never() {
        let s = state_with(WorkflowContext::new());
        assert!(EdgeCondition::<i32>::always().evaluate(&s));
        assert!(!EdgeCondition::<i32>::never().evaluate(&s));
    }

    #[test]
    fn test_double_negation() {
        let s = state_with(WorkflowContext::new());
        let conditions = vec![
            EdgeCondition::always(),
            EdgeCondition::never(),
            EdgeCondition::when("payload > 5", |s: &GraphWorkflowState<i32>| *s.data() > 5),
            EdgeCondition::when("payload > 50", |s: &GraphWorkflowState<i32>| *s.data() > 50),
        ];
        for c in conditions {
            let expected = c.evaluate(&s);
            assert_eq!((!!c.clone()).evaluate(&s), expected, "{}", c);
        }
    }

    #[test]
    fn test_missing_context_key_is_false() {
        let key: ContextKey<String> = ContextKey::new("status");
        let s = state_with(WorkflowContext::new());
        let c = EdgeCondition::<i32>::when_context_equals(&key, "ok".to_string());
        assert!(!c.evaluate(&s));
        assert!(!EdgeCondition::<i32>::when_context_present(&key).evaluate(&s));
    }

    #[test]
    fn test_context_equals() {
        let key: ContextKey<String> = ContextKey::new("status");
        let ctx = WorkflowContext::new().put(&key, "ok".to_string()).unwrap();
        let s = state_with(ctx);
        assert!(EdgeCondition::<i32>::when_context_equals(&key, "ok".to_string()).evaluate(&s));
        assert!(!EdgeCondition::<i32>::when_context_equals(&key, "no".to_string()).evaluate(&s));
    }

    #[test]
    fn test_numeric_comparisons_widen_and_tie() {
        let score: ContextKey<u32> = ContextKey::new("score");
        let ctx = WorkflowContext::new().put(&score, 5).unwrap();
        let s = state_with(ctx);

        assert!(EdgeCondition::<i32>::when_context_greater_than(&score, 4.5).evaluate(&s));
        assert!(EdgeCondition::<i32>::when_context_less_than(&score, 6).evaluate(&s));
        // equal values satisfy neither strict inequality
        assert!(!EdgeCondition::<i32>::when_context_greater_than(&score, 5).evaluate(&s));
        assert!(!EdgeCondition::<i32>::when_context_less_than(&score, 5).evaluate(&s));
    }

    #[test]
    fn test_non_numeric_never_compares() {
        let key: ContextKey<String> = ContextKey::new("score");
        let ctx = WorkflowContext::new().put(&key, "high".to_string()).unwrap();
        let s = state_with(ctx);
        assert!(!EdgeCondition::<i32>::when_context_greater_than(&key, 0).evaluate(&s));
    }

    #[test]
    fn test_combinators_and_description() {
        let flag: ContextKey<bool> = ContextKey::new("flag");
        let ctx = WorkflowContext::new().put(&flag, true).unwrap();
        let s = state_with(ctx);

        let c = EdgeCondition::<i32>::when_context_equals(&flag, true)
            .and(EdgeCondition::never().negate())
            .or(EdgeCondition::never());
        assert!(c.evaluate(&s));
        assert_eq!(c.description(), "((flag == true AND NOT never) OR never)");
    }

    #[test]
    fn test_shared_sub_condition() {
        let shared = Arc::new(EdgeCondition::<i32>::when("big", |s: &GraphWorkflowState<i32>| {
            *s.data() > 5
        }));
        let a = EdgeCondition::always().and_shared(&shared);
        let b = EdgeCondition::never().or_shared(&shared);
        let s = state_with(WorkflowContext::new());
        assert!(a.evaluate(&s));
        assert!(b.evaluate(&s));
        assert_eq!(Arc::strong_count(&shared), 3);
    }
}
