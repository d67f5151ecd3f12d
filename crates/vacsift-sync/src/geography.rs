//! Locality to country resolution over the geography catalog.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use vacsift_core::{AreaNode, GeographyCatalog};

fn default_other_regions_root() -> String {
    "Другие регионы".to_string()
}

fn default_not_found() -> String {
    "Страна не найдена".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeographySettings {
    /// Top-level node whose descendants are reported under their own name.
    #[serde(default = "default_other_regions_root")]
    pub other_regions_root: String,
    /// Country recorded when the locality is absent or unknown.
    #[serde(default = "default_not_found")]
    pub not_found: String,
}

impl Default for GeographySettings {
    fn default() -> Self {
        Self {
            other_regions_root: default_other_regions_root(),
            not_found: default_not_found(),
        }
    }
}

/// Resolver for one run. Answers are memoized per locality name.
pub struct GeographyResolver<'a> {
    catalog: &'a GeographyCatalog,
    settings: &'a GeographySettings,
    memo: HashMap<String, String>,
    tree_walks: usize,
}

impl<'a> GeographyResolver<'a> {
    pub fn new(catalog: &'a GeographyCatalog, settings: &'a GeographySettings) -> Self {
        Self {
            catalog,
            settings,
            memo: HashMap::new(),
            tree_walks: 0,
        }
    }

    pub fn resolve(&mut self, locality: Option<&str>) -> String {
        let Some(name) = locality.map(str::trim).filter(|name| !name.is_empty()) else {
            return self.settings.not_found.clone();
        };
        if let Some(country) = self.memo.get(name) {
            return country.clone();
        }
        let country = self
            .walk(name)
            .unwrap_or_else(|| self.settings.not_found.clone());
        self.memo.insert(name.to_string(), country.clone());
        country
    }

    /// Number of catalog walks so far; one per distinct named locality.
    pub fn tree_walks(&self) -> usize {
        self.tree_walks
    }

    /// Catalog names are trimmed like the locality, so stray whitespace on
    /// either side never breaks a match.
    fn walk(&mut self, name: &str) -> Option<String> {
        self.tree_walks += 1;
        let catalog = self.catalog;
        let other_regions = self.settings.other_regions_root.trim();
        for root in &catalog.roots {
            if root.name.trim() == other_regions {
                if root.children.iter().any(|child| subtree_contains(child, name)) {
                    return Some(name.to_string());
                }
            } else if subtree_contains(root, name) {
                return Some(root.name.trim().to_string());
            }
        }
        None
    }
}

fn subtree_contains(node: &AreaNode, name: &str) -> bool {
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        if current.name.trim() == name {
            return true;
        }
        stack.extend(current.children.iter());
    }
    false
}
