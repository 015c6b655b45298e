use std::fmt;

use crate::models::Collection;

/// Fully-qualified address of one cache slot.
///
/// `variant` distinguishes derived views (e.g. "enhanced") of the same
/// collection and scope. Keys compare structurally.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub collection: Collection,
    pub scope: String,
    pub variant: Option<String>,
}

impl CacheKey {
    pub fn new(collection: Collection, scope: impl Into<String>) -> Self {
        Self {
            collection,
            scope: scope.into(),
            variant: None,
        }
    }

    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    /// The plain (non-variant) view this key derives from.
    pub fn base(&self) -> CacheKey {
        CacheKey::new(self.collection, self.scope.clone())
    }

    pub fn is_base(&self) -> bool {
        self.variant.is_none()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.scope)?;
        if let Some(ref variant) = self.variant {
            write!(f, "#{}", variant)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum VariantFilter {
    Any,
    BaseOnly,
    DerivedOnly,
    Exactly(String),
}

/// Prefix match over cache keys, used for invalidation.
///
/// `KeyPattern::collection(c)` matches every key of the collection;
/// `.scope(s)` narrows it to every variant of one scope; `.base()`,
/// `.derived()` and `.variant(v)` narrow further.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPattern {
    collection: Option<Collection>,
    scope: Option<String>,
    variant: VariantFilter,
}

impl KeyPattern {
    pub fn collection(collection: Collection) -> Self {
        Self {
            collection: Some(collection),
            scope: None,
            variant: VariantFilter::Any,
        }
    }

    /// Every key of every collection for one scope.
    pub fn any_collection(scope: impl Into<String>) -> Self {
        Self {
            collection: None,
            scope: Some(scope.into()),
            variant: VariantFilter::Any,
        }
    }

    /// Exactly one key.
    pub fn exact(key: &CacheKey) -> Self {
        let pattern = Self::collection(key.collection).scope(key.scope.clone());
        match key.variant {
            Some(ref variant) => pattern.variant(variant.clone()),
            None => pattern.base(),
        }
    }

    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = VariantFilter::Exactly(variant.into());
        self
    }

    /// Only the non-variant key.
    pub fn base(mut self) -> Self {
        self.variant = VariantFilter::BaseOnly;
        self
    }

    /// Only variant keys.
    pub fn derived(mut self) -> Self {
        self.variant = VariantFilter::DerivedOnly;
        self
    }

    pub fn matches(&self, key: &CacheKey) -> bool {
        if self.collection.is_some_and(|c| c != key.collection) {
            return false;
        }
        if self.scope.as_ref().is_some_and(|s| *s != key.scope) {
            return false;
        }
        match (&self.variant, &key.variant) {
            (VariantFilter::Any, _) => true,
            (VariantFilter::BaseOnly, variant) => variant.is_none(),
            (VariantFilter::DerivedOnly, variant) => variant.is_some(),
            (VariantFilter::Exactly(want), Some(have)) => want == have,
            (VariantFilter::Exactly(_), None) => false,
        }
    }
}

impl From<&CacheKey> for KeyPattern {
    fn from(key: &CacheKey) -> Self {
        KeyPattern::exact(key)
    }
}
