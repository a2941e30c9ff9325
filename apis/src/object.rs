use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::metadata::{ObjectKey, ObjectMeta};

/// A typed record kept in the record store.
pub trait Resource: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    const KIND: &'static str;

    fn meta(&self) -> &ObjectMeta;
    fn meta_mut(&mut self) -> &mut ObjectMeta;

    fn name(&self) -> &str {
        &self.meta().name
    }

    fn namespace(&self) -> &str {
        &self.meta().namespace
    }

    fn key(&self) -> ObjectKey {
        self.meta().key()
    }

    fn resource_version(&self) -> u64 {
        self.meta().resource_version
    }
}

macro_rules! impl_resource {
    ($ty:ty, $kind:expr) => {
        impl $crate::object::Resource for $ty {
            const KIND: &'static str = $kind;

            fn meta(&self) -> &$crate::metadata::ObjectMeta {
                &self.metadata
            }

            fn meta_mut(&mut self) -> &mut $crate::metadata::ObjectMeta {
                &mut self.metadata
            }
        }
    };
}

pub(crate) use impl_resource;

/// A closed set of state names with their exact wire spelling.
macro_rules! state_enum {
    (
        $(#[$meta:meta])*
        $name:ident default $default:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $text)] $variant, )+
        }

        impl Default for $name {
            fn default() -> Self {
                $name::$default
            }
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $text, )+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::StoreError;

            fn from_str(s: &str) -> $crate::Result<Self> {
                match s {
                    $( $text => Ok($name::$variant), )+
                    other => Err($crate::StoreError::Invalid(format!(
                        "unknown {} {:?}",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

pub(crate) use state_enum;
