use std::any::{Any, TypeId};
use std::borrow::Cow;
use std::collections::VecDeque;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Types that can be published by type.
///
/// The provided [`Event::event_type`] describes the concrete type with no
/// supertypes. Override it to declare the supertypes (or "interfaces") an
/// event should be delivered to, or to publish a parameterized descriptor.
///
/// ```rust
/// use relay_event_bus::{Event, TypeDescriptor};
///
/// struct IceCream;
/// struct Vanilla;
///
/// impl Event for Vanilla {
///     fn event_type(&self) -> TypeDescriptor {
///         TypeDescriptor::of::<Self>().with_supertype(TypeDescriptor::of::<IceCream>())
///     }
/// }
///
/// let vanilla = Vanilla.event_type();
/// assert!(vanilla.is_assignable_to(&TypeDescriptor::of::<IceCream>()));
/// ```
pub trait Event: Any + Send + Sync {
    fn event_type(&self) -> TypeDescriptor {
        TypeDescriptor::of::<Self>()
    }
}

#[derive(Debug, Clone)]
enum RawType {
    Id { id: TypeId, name: &'static str },
    Named(Cow<'static, str>),
}

impl RawType {
    fn name(&self) -> &str {
        match self {
            Self::Id { name, .. } => name,
            Self::Named(name) => name,
        }
    }
}

impl PartialEq for RawType {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Id { id: a, .. }, Self::Id { id: b, .. }) => a == b,
            (Self::Named(a), Self::Named(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for RawType {}

impl Hash for RawType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Id { id, .. } => {
                0u8.hash(state);
                id.hash(state);
            },
            Self::Named(name) => {
                1u8.hash(state);
                name.hash(state);
            },
        }
    }
}

/// One type argument of a parameterized descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeArg {
    /// An exact (invariant) argument.
    Exact(TypeDescriptor),
    /// Unbounded wildcard: accepts any argument.
    Any,
    /// Upper-bounded wildcard: accepts the bound or any of its subtypes.
    Extends(TypeDescriptor),
    /// Lower-bounded wildcard: accepts the bound or any of its supertypes.
    Super(TypeDescriptor),
}

impl TypeArg {
    /// Whether an argument `candidate` is contained by this (target) argument.
    fn contains(&self, candidate: &Self) -> bool {
        if self == candidate {
            return true;
        }
        match (self, candidate) {
            (Self::Any, _) => true,
            (Self::Extends(bound), Self::Exact(arg) | Self::Extends(arg)) => {
                arg.is_assignable_to(bound)
            },
            (Self::Super(bound), Self::Exact(arg) | Self::Super(arg)) => {
                bound.is_assignable_to(arg)
            },
            _ => false,
        }
    }
}

impl fmt::Display for TypeArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(ty) => write!(f, "{ty}"),
            Self::Any => f.write_str("?"),
            Self::Extends(ty) => write!(f, "? extends {ty}"),
            Self::Super(ty) => write!(f, "? super {ty}"),
        }
    }
}

/// Structural description of an event type used as a subscription key.
///
/// A descriptor has a raw identity (a Rust [`TypeId`] or a free-form name),
/// ordered type arguments and a list of declared supertypes. Equality and
/// hashing consider the raw identity and the arguments only; the supertype
/// list drives [`TypeDescriptor::is_assignable_to`].
#[derive(Clone)]
pub struct TypeDescriptor {
    raw: RawType,
    args: Vec<TypeArg>,
    supertypes: Vec<TypeDescriptor>,
}

impl TypeDescriptor {
    /// Describes the Rust type `T`. Works for `dyn Trait` markers too.
    #[must_use]
    pub fn of<T: ?Sized + Any>() -> Self {
        Self {
            raw: RawType::Id { id: TypeId::of::<T>(), name: std::any::type_name::<T>() },
            args: Vec::new(),
            supertypes: Vec::new(),
        }
    }

    /// Describes a type by name, for hierarchies that have no Rust type.
    #[must_use]
    pub fn named(name: impl Into<Cow<'static, str>>) -> Self {
        Self { raw: RawType::Named(name.into()), args: Vec::new(), supertypes: Vec::new() }
    }

    #[must_use]
    pub fn with_arg(mut self, arg: TypeArg) -> Self {
        self.args.push(arg);
        self
    }

    #[must_use]
    pub fn with_args(mut self, args: impl IntoIterator<Item = TypeArg>) -> Self {
        self.args.extend(args);
        self
    }

    /// Declares a direct supertype.
    #[must_use]
    pub fn with_supertype(mut self, supertype: Self) -> Self {
        self.supertypes.push(supertype);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.raw.name()
    }

    #[must_use]
    pub fn args(&self) -> &[TypeArg] {
        &self.args
    }

    #[must_use]
    pub fn supertypes(&self) -> &[Self] {
        &self.supertypes
    }

    /// Whether a value described by `self` may be delivered to a subscriber of `target`.
    ///
    /// Holds when the raw identities match and every target argument contains
    /// the corresponding argument of `self` (a target without arguments is the
    /// raw type and accepts any parameterization), or when any declared
    /// supertype is itself assignable. Assignability only widens.
    #[must_use]
    pub fn is_assignable_to(&self, target: &Self) -> bool {
        if self.raw == target.raw {
            if target.args.is_empty() {
                return true;
            }
            if self.args.len() == target.args.len()
                && target.args.iter().zip(&self.args).all(|(t, s)| t.contains(s))
            {
                return true;
            }
        }
        self.supertypes.iter().any(|s| s.is_assignable_to(target))
    }

    /// Breadth-first walk over `self` and all declared supertypes, nearest first.
    #[must_use]
    pub fn ancestry(&self) -> Vec<&Self> {
        let mut seen: Vec<&Self> = Vec::new();
        let mut queue = VecDeque::from([self]);
        while let Some(next) = queue.pop_front() {
            if seen.contains(&next) {
                continue;
            }
            seen.push(next);
            queue.extend(next.supertypes.iter());
        }
        seen
    }
}

impl PartialEq for TypeDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw && self.args == other.args
    }
}

impl Eq for TypeDescriptor {}

impl Hash for TypeDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
        self.args.hash(state);
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.raw.name())?;
        if let Some((first, rest)) = self.args.split_first() {
            write!(f, "<{first}")?;
            for arg in rest {
                write!(f, ", {arg}")?;
            }
            f.write_str(">")?;
        }
        Ok(())
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.to_string())
            .field("supertypes", &self.supertypes.len())
            .finish()
    }
}
