//! Users and their attributes.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::Str;

/// A user (evaluation context) as seen by the evaluator.
///
/// Users carry a key, a fixed set of builtin attributes, and arbitrary
/// custom attributes. Rules can reference any of them by name.
///
/// A `User` without a key can be represented (wire data is not guaranteed to
/// carry one); evaluating any flag for such a user produces
/// [`crate::ErrorKind::UserNotSpecified`]. An empty key is allowed for
/// backward compatibility and participates in hashing like any other key.
///
/// # Examples
/// ```
/// # use switchboard_eval::User;
/// let user = User::builder("bob-7")
///     .email("bob@example.com")
///     .custom("plan", "enterprise")
///     .build();
/// assert_eq!(user.key(), Some("bob-7"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key: Option<Str>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    secondary: Option<Str>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ip: Option<Str>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    email: Option<Str>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<Str>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    avatar: Option<Str>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    first_name: Option<Str>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_name: Option<Str>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    country: Option<Str>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    anonymous: Option<bool>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    custom: HashMap<String, Value>,
}

impl User {
    /// Create a user with the given key and no other attributes.
    pub fn with_key(key: impl Into<Str>) -> User {
        User {
            key: Some(key.into()),
            ..User::default()
        }
    }

    /// Start building a user with the given key.
    pub fn builder(key: impl Into<Str>) -> UserBuilder {
        UserBuilder {
            user: User::with_key(key),
        }
    }

    /// The user's key, if it has one.
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// The user's secondary key, if any. Appended to the bucketing input for
    /// unseeded rollouts.
    pub fn secondary(&self) -> Option<&str> {
        self.secondary.as_deref()
    }

    /// Resolve the value of an attribute on this user.
    ///
    /// The key is exposed as an attribute so that rules can target it like
    /// any other value. Returns `None` when the attribute is not set.
    pub(crate) fn attribute(&self, attribute: &UserAttribute) -> Option<Value> {
        let string = |s: &Option<Str>| s.as_deref().map(|s| Value::String(s.to_owned()));
        match attribute {
            UserAttribute::Key => string(&self.key),
            UserAttribute::Secondary => string(&self.secondary),
            UserAttribute::Ip => string(&self.ip),
            UserAttribute::Email => string(&self.email),
            UserAttribute::Name => string(&self.name),
            UserAttribute::Avatar => string(&self.avatar),
            UserAttribute::FirstName => string(&self.first_name),
            UserAttribute::LastName => string(&self.last_name),
            UserAttribute::Country => string(&self.country),
            UserAttribute::Anonymous => self.anonymous.map(Value::Bool),
            UserAttribute::Custom(name) => self.custom.get(name.as_ref()).cloned(),
        }
    }
}

/// Builder for [`User`].
#[derive(Debug, Clone)]
pub struct UserBuilder {
    user: User,
}

macro_rules! string_setters {
    ($($(#[$doc:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$doc])*
            pub fn $name(mut self, value: impl Into<Str>) -> UserBuilder {
                self.user.$name = Some(value.into());
                self
            }
        )*
    };
}

impl UserBuilder {
    string_setters! {
        /// Set the secondary key, used to further subdivide rollout buckets.
        secondary,
        /// Set the IP address attribute.
        ip,
        /// Set the email attribute.
        email,
        /// Set the full name attribute.
        name,
        /// Set the avatar URL attribute.
        avatar,
        /// Set the first name attribute.
        first_name,
        /// Set the last name attribute.
        last_name,
        /// Set the country attribute.
        country,
    }

    /// Mark the user as anonymous.
    pub fn anonymous(mut self, value: bool) -> UserBuilder {
        self.user.anonymous = Some(value);
        self
    }

    /// Set a custom attribute. Values can be any JSON value; array values
    /// make the attribute multi-valued for clause matching.
    pub fn custom(mut self, name: impl Into<String>, value: impl Into<Value>) -> UserBuilder {
        self.user.custom.insert(name.into(), value.into());
        self
    }

    /// Finish building the user.
    pub fn build(self) -> User {
        self.user
    }
}

/// Name of a user attribute as referenced by clauses and rollouts.
///
/// Builtin attributes have fixed names; any other name refers to a custom
/// attribute. On the wire this is a plain string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UserAttribute {
    /// The user's key.
    Key,
    /// The user's secondary key.
    Secondary,
    /// The user's IP address.
    Ip,
    /// The user's email address.
    Email,
    /// The user's full name.
    Name,
    /// The user's avatar URL.
    Avatar,
    /// The user's first name.
    FirstName,
    /// The user's last name.
    LastName,
    /// The user's country.
    Country,
    /// Whether the user is anonymous.
    Anonymous,
    /// A custom attribute, by name.
    Custom(Str),
}

impl UserAttribute {
    /// The wire name of this attribute.
    pub fn as_str(&self) -> &str {
        match self {
            UserAttribute::Key => "key",
            UserAttribute::Secondary => "secondary",
            UserAttribute::Ip => "ip",
            UserAttribute::Email => "email",
            UserAttribute::Name => "name",
            UserAttribute::Avatar => "avatar",
            UserAttribute::FirstName => "firstName",
            UserAttribute::LastName => "lastName",
            UserAttribute::Country => "country",
            UserAttribute::Anonymous => "anonymous",
            UserAttribute::Custom(name) => name,
        }
    }
}

impl From<&str> for UserAttribute {
    fn from(name: &str) -> UserAttribute {
        match name {
            "key" => UserAttribute::Key,
            "secondary" => UserAttribute::Secondary,
            "ip" => UserAttribute::Ip,
            "email" => UserAttribute::Email,
            "name" => UserAttribute::Name,
            "avatar" => UserAttribute::Avatar,
            "firstName" => UserAttribute::FirstName,
            "lastName" => UserAttribute::LastName,
            "country" => UserAttribute::Country,
            "anonymous" => UserAttribute::Anonymous,
            _ => UserAttribute::Custom(name.into()),
        }
    }
}

impl Serialize for UserAttribute {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for UserAttribute {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(UserAttribute::from(name.as_str()))
    }
}
