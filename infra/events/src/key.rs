use crate::descriptor::TypeDescriptor;
use crate::error::EventBusError;
use regex::Regex;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A compiled topic pattern.
///
/// Patterns must match the whole topic: `IceCream.*` matches `IceCream.Vanilla`
/// but not `MyIceCream.Vanilla`. Two patterns are the same key when their
/// source text is identical.
#[derive(Clone)]
pub struct TopicPattern {
    source: Arc<str>,
    regex: Regex,
}

impl TopicPattern {
    /// Compiles a pattern.
    ///
    /// # Errors
    /// [`EventBusError::InvalidKey`] for an empty pattern and
    /// [`EventBusError::InvalidPattern`] if the regex does not compile.
    pub fn new(pattern: &str) -> Result<Self, EventBusError> {
        if pattern.is_empty() {
            return Err(EventBusError::InvalidKey {
                message: "topic pattern must not be empty".into(),
                context: None,
            });
        }
        let regex = Regex::new(&format!("^(?:{pattern})$"))
            .map_err(|source| EventBusError::InvalidPattern {
                source,
                context: Some(format!("pattern '{pattern}'").into()),
            })?;
        Ok(Self { source: pattern.into(), regex })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn is_match(&self, topic: &str) -> bool {
        self.regex.is_match(topic)
    }
}

impl PartialEq for TopicPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for TopicPattern {}

impl Hash for TopicPattern {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source.hash(state);
    }
}

impl fmt::Debug for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TopicPattern").field(&self.source).finish()
    }
}

/// What a subscriber or veto listener registers against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubscriptionKey {
    /// Receives events of this type and of every type declaring it as a supertype.
    Type(TypeDescriptor),
    /// Receives events of exactly this type.
    ExactType(TypeDescriptor),
    /// Receives publications on this exact topic.
    Topic(Arc<str>),
    /// Receives publications on every topic the pattern matches.
    Pattern(TopicPattern),
}

impl SubscriptionKey {
    /// Polymorphic key for the Rust type `T`.
    #[must_use]
    pub fn of<T: ?Sized + std::any::Any>() -> Self {
        Self::Type(TypeDescriptor::of::<T>())
    }

    /// Non-polymorphic key for the Rust type `T`.
    #[must_use]
    pub fn exactly<T: ?Sized + std::any::Any>() -> Self {
        Self::ExactType(TypeDescriptor::of::<T>())
    }

    /// Pattern key.
    ///
    /// # Errors
    /// See [`TopicPattern::new`].
    pub fn pattern(pattern: &str) -> Result<Self, EventBusError> {
        TopicPattern::new(pattern).map(Self::Pattern)
    }

    /// Rejects keys that can never be published to.
    pub(crate) fn validate(&self) -> Result<(), EventBusError> {
        match self {
            Self::Topic(topic) => validate_topic(topic),
            _ => Ok(()),
        }
    }

    /// Whether a publication on `route` is delivered to this key.
    pub(crate) fn matches(&self, route: &Route) -> bool {
        match (self, route) {
            (Self::Type(key), Route::Type(ty)) => ty.is_assignable_to(key),
            (Self::ExactType(key), Route::Type(ty)) => key == ty,
            (Self::Topic(key), Route::Topic(topic)) => key == topic,
            (Self::Pattern(pattern), Route::Topic(topic)) => pattern.is_match(topic),
            _ => false,
        }
    }
}

impl From<TypeDescriptor> for SubscriptionKey {
    fn from(value: TypeDescriptor) -> Self {
        Self::Type(value)
    }
}

impl From<TopicPattern> for SubscriptionKey {
    fn from(value: TopicPattern) -> Self {
        Self::Pattern(value)
    }
}

impl From<&str> for SubscriptionKey {
    fn from(value: &str) -> Self {
        Self::Topic(value.into())
    }
}

impl From<String> for SubscriptionKey {
    fn from(value: String) -> Self {
        Self::Topic(value.into())
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Type(ty) => write!(f, "type:{ty}"),
            Self::ExactType(ty) => write!(f, "exact:{ty}"),
            Self::Topic(topic) => write!(f, "topic:{topic}"),
            Self::Pattern(pattern) => write!(f, "pattern:{}", pattern.as_str()),
        }
    }
}

/// Where one publication goes: the runtime type of an event, or a topic.
///
/// Routes also key the recency cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Route {
    Type(TypeDescriptor),
    Topic(Arc<str>),
}

impl Route {
    #[must_use]
    pub fn of<T: ?Sized + std::any::Any>() -> Self {
        Self::Type(TypeDescriptor::of::<T>())
    }

    #[must_use]
    pub fn topic(&self) -> Option<&str> {
        match self {
            Self::Topic(topic) => Some(topic.as_ref()),
            Self::Type(_) => None,
        }
    }

    #[must_use]
    pub const fn event_type(&self) -> Option<&TypeDescriptor> {
        match self {
            Self::Type(ty) => Some(ty),
            Self::Topic(_) => None,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), EventBusError> {
        match self {
            Self::Topic(topic) => validate_topic(topic),
            Self::Type(_) => Ok(()),
        }
    }
}

impl From<TypeDescriptor> for Route {
    fn from(value: TypeDescriptor) -> Self {
        Self::Type(value)
    }
}

impl From<&str> for Route {
    fn from(value: &str) -> Self {
        Self::Topic(value.into())
    }
}

impl From<String> for Route {
    fn from(value: String) -> Self {
        Self::Topic(value.into())
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Type(ty) => write!(f, "type:{ty}"),
            Self::Topic(topic) => write!(f, "topic:{topic}"),
        }
    }
}

fn validate_topic(topic: &str) -> Result<(), EventBusError> {
    if topic.is_empty() {
        return Err(EventBusError::InvalidKey {
            message: "topic must not be empty".into(),
            context: None,
        });
    }
    Ok(())
}
