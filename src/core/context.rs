//! Per-file resolution state: import bindings, enclosing scopes and the
//! bounded literal map used for constant propagation.

use std::collections::BTreeMap;

use crate::core::sketch::{FileSketches, LiteralAssignment};

/// Local alias -> target FQN, built from one file's imports
#[derive(Debug, Clone, Default)]
pub struct ImportBinding {
    aliases: BTreeMap<String, String>,
    wildcards: Vec<String>,
}

impl ImportBinding {
    pub fn from_file(file: &FileSketches) -> Self {
        let mut binding = Self::default();
        for import in &file.imports {
            if import.wildcard {
                if !binding.wildcards.contains(&import.target) {
                    binding.wildcards.push(import.target.clone());
                }
                continue;
            }
            let alias = import.alias.clone().unwrap_or_else(|| {
                last_segment(&import.target, &file.separator).to_string()
            });
            // Later imports shadow earlier ones with the same alias
            binding.aliases.insert(alias, import.target.clone());
        }
        binding
    }

    pub fn alias(&self, alias: &str) -> Option<&str> {
        self.aliases.get(alias).map(String::as_str)
    }

    pub fn wildcards(&self) -> &[String] {
        &self.wildcards
    }

    /// Expand the first segment of `name` if it is a bound alias
    pub fn expand(&self, name: &str, separator: &str) -> Option<String> {
        if let Some(target) = self.aliases.get(name) {
            return Some(target.clone());
        }
        let (head, rest) = name.split_once(separator)?;
        self.aliases
            .get(head)
            .map(|target| format!("{}{}{}", target, separator, rest))
    }

    pub fn len(&self) -> usize {
        self.aliases.len() + self.wildcards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Variable -> literal bindings, keyed by scope
#[derive(Debug, Clone, Default)]
pub struct LiteralBindings {
    by_scope: BTreeMap<(Option<String>, String), Vec<(u32, String)>>,
}

impl LiteralBindings {
    pub fn from_assignments(assignments: &[LiteralAssignment]) -> Self {
        let mut bindings = Self::default();
        for assignment in assignments {
            bindings
                .by_scope
                .entry((assignment.scope.clone(), assignment.variable.clone()))
                .or_default()
                .push((assignment.line, assignment.literal.clone()));
        }
        for values in bindings.by_scope.values_mut() {
            values.sort();
        }
        bindings
    }

    /// Latest literal assigned to `variable` in `scope` at or before `line`
    pub fn lookup(&self, scope: Option<&str>, variable: &str, line: u32) -> Option<&str> {
        let key = (scope.map(str::to_string), variable.to_string());
        self.by_scope
            .get(&key)?
            .iter()
            .rev()
            .find(|(at, _)| *at <= line)
            .map(|(_, literal)| literal.as_str())
    }
}

/// Transient state for resolving one file's references
#[derive(Debug, Clone)]
pub struct ResolutionContext<'a> {
    pub file_path: &'a str,
    pub namespace: Option<&'a str>,
    pub separator: &'a str,
    pub imports: &'a ImportBinding,
    pub literals: &'a LiteralBindings,
    /// FQN of the innermost enclosing type
    pub enclosing_type: Option<String>,
    /// FQN of the innermost enclosing function or method
    pub enclosing_callable: Option<String>,
    /// Relative path of the enclosing callable, as used by literal scopes
    pub scope: Option<String>,
}

impl<'a> ResolutionContext<'a> {
    pub fn for_file(
        file: &'a FileSketches,
        imports: &'a ImportBinding,
        literals: &'a LiteralBindings,
    ) -> Self {
        Self {
            file_path: &file.path,
            namespace: file.namespace.as_deref(),
            separator: &file.separator,
            imports,
            literals,
            enclosing_type: None,
            enclosing_callable: None,
            scope: None,
        }
    }

    /// Point the context at the definition a reference occurs in
    pub fn enter(&mut self, file: &FileSketches, from: Option<&str>) {
        self.enclosing_type = None;
        self.enclosing_callable = None;
        self.scope = from.map(str::to_string);

        let mut cursor = from.map(str::to_string);
        while let Some(relative) = cursor {
            let Some(sketch) = file.symbol_at(&relative) else {
                break;
            };
            if self.enclosing_callable.is_none() && sketch.kind.is_callable() {
                self.enclosing_callable = Some(file.qualify(&relative));
            }
            if sketch.kind.is_type() {
                self.enclosing_type = Some(file.qualify(&relative));
                break;
            }
            cursor = sketch.parent.clone();
        }
    }

    pub fn qualify_in_namespace(&self, name: &str) -> Option<String> {
        self.namespace
            .filter(|ns| !ns.is_empty())
            .map(|ns| format!("{}{}{}", ns, self.separator, name))
    }

    pub fn is_qualified(&self, name: &str) -> bool {
        name.contains(self.separator)
    }

    pub fn short_name<'n>(&self, name: &'n str) -> &'n str {
        last_segment(name, self.separator)
    }

    /// Best FQN to give a placeholder for an unresolved name
    pub fn placeholder_fqn(&self, name: &str) -> String {
        self.imports
            .expand(name, self.separator)
            .unwrap_or_else(|| name.to_string())
    }

    pub fn literal(&self, variable: &str, line: u32) -> Option<&'a str> {
        self.literals.lookup(self.scope.as_deref(), variable, line)
    }
}

pub fn last_segment<'n>(name: &'n str, separator: &str) -> &'n str {
    name.rsplit(separator).next().unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::SymbolKind;
    use crate::core::sketch::{ImportSketch, SymbolSketch};

    fn sample_file() -> FileSketches {
        let mut file = FileSketches::new("Svc.java", "java", ".");
        file.namespace = Some("app".to_string());
        file.imports.push(ImportSketch {
            target: "com.lib.Base".to_string(),
            alias: None,
            wildcard: false,
            line: 2,
        });
        file.imports.push(ImportSketch {
            target: "com.util".to_string(),
            alias: None,
            wildcard: true,
            line: 3,
        });
        file.symbols
            .push(SymbolSketch::new("Svc", None, SymbolKind::Class, 5, 1));
        file.symbols
            .push(SymbolSketch::new("run", Some("Svc"), SymbolKind::Method, 6, 5));
        file
    }

    #[test]
    fn test_import_binding_expands_aliases() {
        let file = sample_file();
        let binding = ImportBinding::from_file(&file);
        assert_eq!(binding.alias("Base"), Some("com.lib.Base"));
        assert_eq!(binding.expand("Base", "."), Some("com.lib.Base".to_string()));
        assert_eq!(
            binding.expand("Base.Inner", "."),
            Some("com.lib.Base.Inner".to_string())
        );
        assert_eq!(binding.expand("Other", "."), None);
        assert_eq!(binding.wildcards().to_vec(), vec!["com.util".to_string()]);
    }

    #[test]
    fn test_literal_lookup_respects_scope_and_order() {
        let assignments = vec![
            LiteralAssignment {
                scope: Some("Svc.run".to_string()),
                variable: "cls".to_string(),
                literal: "First".to_string(),
                line: 10,
            },
            LiteralAssignment {
                scope: Some("Svc.run".to_string()),
                variable: "cls".to_string(),
                literal: "Second".to_string(),
                line: 14,
            },
        ];
        let literals = LiteralBindings::from_assignments(&assignments);

        assert_eq!(literals.lookup(Some("Svc.run"), "cls", 9), None);
        assert_eq!(literals.lookup(Some("Svc.run"), "cls", 12), Some("First"));
        assert_eq!(literals.lookup(Some("Svc.run"), "cls", 20), Some("Second"));
        assert_eq!(literals.lookup(Some("Svc.other"), "cls", 20), None);
    }

    #[test]
    fn test_enter_sets_enclosing_scopes() {
        let file = sample_file();
        let binding = ImportBinding::from_file(&file);
        let literals = LiteralBindings::default();
        let mut ctx = ResolutionContext::for_file(&file, &binding, &literals);

        ctx.enter(&file, Some("Svc.run"));
        assert_eq!(ctx.enclosing_type.as_deref(), Some("app.Svc"));
        assert_eq!(ctx.enclosing_callable.as_deref(), Some("app.Svc.run"));

        ctx.enter(&file, None);
        assert!(ctx.enclosing_type.is_none());
        assert_eq!(ctx.placeholder_fqn("Base"), "com.lib.Base");
        assert_eq!(ctx.placeholder_fqn("Unknown"), "Unknown");
    }
}
