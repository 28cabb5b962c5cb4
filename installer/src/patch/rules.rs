//! Directive rewrite rules.
//!
//! Rules match on the prefix of the whitespace-trimmed line and are not a
//! structural parse of the configuration. Every line whose trimmed text
//! starts with a rule's prefix is rewritten, including every
//! `<Directory ...>` header in the file, not only the one guarding the
//! document root.

use super::spec::PatchSpec;
use std::fmt;

/// A single prefix-matched rewrite.
///
/// # Examples
///
/// ```
/// use artefact_provisioner::patch::rules::DirectiveRule;
///
/// let rule = DirectiveRule::new("listen", "Listen ", "Listen 8080");
/// assert!(rule.matches("  Listen 80\n"));
/// assert!(!rule.matches("#Listen 80\n"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectiveRule {
    name: &'static str,
    prefix: String,
    replacement: String,
}

impl DirectiveRule {
    /// Create a rule replacing lines starting with `prefix` by `replacement`.
    #[must_use]
    pub fn new(
        name: &'static str,
        prefix: impl Into<String>,
        replacement: impl Into<String>,
    ) -> Self {
        Self {
            name,
            prefix: prefix.into(),
            replacement: replacement.into(),
        }
    }

    /// Return the rule's short name used in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Return the replacement text, without a line terminator.
    #[must_use]
    pub fn replacement(&self) -> &str {
        &self.replacement
    }

    /// Return whether `line` is rewritten by this rule.
    #[must_use]
    pub fn matches(&self, line: &str) -> bool {
        line.trim().starts_with(self.prefix.as_str())
    }
}

/// Rules evaluated in priority order; the first match wins.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RuleSet {
    rules: Vec<DirectiveRule>,
}

impl RuleSet {
    /// Create a rule set from `rules`, highest priority first.
    #[must_use]
    pub fn new(rules: Vec<DirectiveRule>) -> Self {
        Self { rules }
    }

    /// The four Apache `httpd.conf` rules: listen port, default virtual
    /// host, document root and directory block header.
    ///
    /// # Examples
    ///
    /// ```
    /// use artefact_provisioner::patch::rules::RuleSet;
    /// use artefact_provisioner::patch::spec::{ListenPort, PatchSpec};
    ///
    /// let spec = PatchSpec::new(
    ///     ListenPort::new(8080).unwrap(),
    ///     "/srv/app".into(),
    ///     "/opt/php".into(),
    ///     "/opt/php/libphp.so".into(),
    /// );
    /// let rules = RuleSet::apache(&spec);
    /// let rule = rules.first_match("<VirtualHost _default_:80>\n").unwrap();
    /// assert_eq!(rule.replacement(), "<VirtualHost _default_:8080>");
    /// ```
    #[must_use]
    pub fn apache(spec: &PatchSpec) -> Self {
        let port = spec.listen_port();
        let root = spec.document_root();
        Self::new(vec![
            DirectiveRule::new("listen", "Listen ", format!("Listen {port}")),
            DirectiveRule::new(
                "virtual-host",
                "<VirtualHost _default_:80>",
                format!("<VirtualHost _default_:{port}>"),
            ),
            DirectiveRule::new(
                "document-root",
                "DocumentRoot ",
                format!("DocumentRoot \"{root}\""),
            ),
            DirectiveRule::new(
                "directory",
                "<Directory ",
                format!("<Directory \"{root}\">"),
            ),
        ])
    }

    /// Return the highest-priority rule matching `line`.
    #[must_use]
    pub fn first_match(&self, line: &str) -> Option<&DirectiveRule> {
        self.rules.iter().find(|rule| rule.matches(line))
    }

    /// Return the rules in priority order.
    #[must_use]
    pub fn rules(&self) -> &[DirectiveRule] {
        &self.rules
    }
}

impl fmt::Display for RuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.rules.iter().map(DirectiveRule::name).collect();
        f.write_str(&names.join(", "))
    }
}
