use crate::object::Resource;

/// Fields a listing can be narrowed by. Each record kind exposes the ones it has.
pub trait Filterable: Resource {
    fn state_name(&self) -> Option<String> {
        None
    }

    fn node_name(&self) -> Option<&str> {
        None
    }

    fn class(&self) -> Option<String> {
        None
    }

    fn synced(&self) -> Option<bool> {
        None
    }

    fn volume_group(&self) -> Option<&str> {
        None
    }

    fn claim_namespace(&self) -> Option<&str> {
        None
    }
}

/// Conjunction of optional field predicates. Unset fields match everything;
/// a set field never matches a record that lacks it.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub name: Option<String>,
    pub state: Option<String>,
    pub node_name: Option<String>,
    pub class: Option<String>,
    pub synced: Option<bool>,
    pub volume_group: Option<String>,
    pub namespace: Option<String>,
}

impl ListFilter {
    /// Sets the state predicate after checking `raw` names a state of `S`.
    pub fn with_state<S>(mut self, raw: &str) -> crate::Result<Self>
    where
        S: std::str::FromStr<Err = crate::StoreError> + std::fmt::Display,
    {
        let state: S = raw.parse()?;
        self.state = Some(state.to_string());
        Ok(self)
    }

    pub fn matches<T: Filterable>(&self, item: &T) -> bool {
        if let Some(name) = &self.name {
            if !item.name().contains(name.as_str()) {
                return false;
            }
        }
        if let Some(state) = &self.state {
            if item.state_name().as_deref() != Some(state.as_str()) {
                return false;
            }
        }
        if let Some(node) = &self.node_name {
            if item.node_name() != Some(node.as_str()) {
                return false;
            }
        }
        if let Some(class) = &self.class {
            if item.class().as_deref() != Some(class.as_str()) {
                return false;
            }
        }
        if let Some(synced) = self.synced {
            if item.synced() != Some(synced) {
                return false;
            }
        }
        if let Some(group) = &self.volume_group {
            if item.volume_group() != Some(group.as_str()) {
                return false;
            }
        }
        if let Some(ns) = &self.namespace {
            let namespace = item.claim_namespace().unwrap_or(item.namespace());
            if namespace != ns {
                return false;
            }
        }
        true
    }

    pub fn apply<T: Filterable>(&self, items: Vec<T>) -> Vec<T> {
        items.into_iter().filter(|item| self.matches(item)).collect()
    }
}
