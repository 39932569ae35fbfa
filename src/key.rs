// Copyright 2018-2019 Mozilla
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

use std::borrow::Cow;

/// The text stored for a missing key. The key column is the primary index and
/// never holds null.
pub const NONE_KEY: &str = "None";

/// Something that can be used as a key.
pub trait ToKey {
    fn to_key(&self) -> Cow<str>;
}

/// Something that can be stored as a value. `None` is stored as a null value,
/// which reads back as `None` and is distinct from the text `"None"`.
pub trait ToValue {
    fn to_value(&self) -> Option<Cow<str>>;
}

impl ToKey for str {
    fn to_key(&self) -> Cow<str> {
        Cow::Borrowed(self)
    }
}

impl ToKey for String {
    fn to_key(&self) -> Cow<str> {
        Cow::Borrowed(self.as_str())
    }
}

impl<'a, T: ToKey + ?Sized> ToKey for &'a T {
    fn to_key(&self) -> Cow<str> {
        (**self).to_key()
    }
}

impl<T: ToKey> ToKey for Option<T> {
    fn to_key(&self) -> Cow<str> {
        match self {
            Some(key) => key.to_key(),
            None => Cow::Borrowed(NONE_KEY),
        }
    }
}

impl ToValue for str {
    fn to_value(&self) -> Option<Cow<str>> {
        Some(Cow::Borrowed(self))
    }
}

impl ToValue for String {
    fn to_value(&self) -> Option<Cow<str>> {
        Some(Cow::Borrowed(self.as_str()))
    }
}

impl<'a, T: ToValue + ?Sized> ToValue for &'a T {
    fn to_value(&self) -> Option<Cow<str>> {
        (**self).to_value()
    }
}

impl<T: ToValue> ToValue for Option<T> {
    fn to_value(&self) -> Option<Cow<str>> {
        self.as_ref().and_then(|value| value.to_value())
    }
}

macro_rules! impl_to_key_value_for_integer {
    ($($t:ty),*) => {
        $(
            impl ToKey for $t {
                fn to_key(&self) -> Cow<str> {
                    Cow::Owned(self.to_string())
                }
            }

            impl ToValue for $t {
                fn to_value(&self) -> Option<Cow<str>> {
                    Some(Cow::Owned(self.to_string()))
                }
            }
        )*
    };
}

impl_to_key_value_for_integer!(i8, i16, i32, i64, u8, u16, u32, u64, usize, isize);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_key_is_text() {
        let key: Option<&str> = None;
        assert_eq!(key.to_key(), "None");
        assert_eq!(Some("a").to_key(), "a");
        assert_eq!("None".to_key(), key.to_key());
    }

    #[test]
    fn test_none_value_is_null() {
        let value: Option<&str> = None;
        assert_eq!(value.to_value(), None);
        assert_eq!("None".to_value().as_deref(), Some("None"));
        assert_eq!(Some(String::from("v")).to_value().as_deref(), Some("v"));
    }

    #[test]
    fn test_integers() {
        assert_eq!(42u32.to_key(), "42");
        assert_eq!((-1i64).to_value().as_deref(), Some("-1"));
        assert_eq!((&7usize).to_key(), "7");
    }
}
