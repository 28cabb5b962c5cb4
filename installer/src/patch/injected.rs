//! The directive block appended after rewriting.

use super::spec::PatchSpec;

/// Comment line opening the injected block.
pub const INJECTED_HEADER: &str = "# PHP Configuration";

/// A fixed block of directives appended to the end of the document.
///
/// # Examples
///
/// ```
/// use artefact_provisioner::patch::injected::InjectedBlock;
///
/// let block = InjectedBlock::new(["DirectoryIndex index.php"]);
/// assert_eq!(block.render(), "\n# PHP Configuration\nDirectoryIndex index.php\n");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectedBlock {
    directives: Vec<String>,
}

impl InjectedBlock {
    /// Create a block from directive lines without terminators.
    #[must_use]
    pub fn new<I, S>(directives: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            directives: directives.into_iter().map(Into::into).collect(),
        }
    }

    /// The PHP module, handler, ini directory and index directives.
    #[must_use]
    pub fn php(spec: &PatchSpec) -> Self {
        Self::new([
            format!("LoadModule php_module \"{}\"", spec.module_path()),
            "AddHandler application/x-httpd-php .php".to_owned(),
            format!("PHPIniDir \"{}\"", spec.config_search_dir()),
            "DirectoryIndex index.php index.html".to_owned(),
        ])
    }

    /// Return the directive lines.
    #[must_use]
    pub fn directives(&self) -> &[String] {
        &self.directives
    }

    /// Render the block as appended: a blank line, the header, then one
    /// line per directive.
    #[must_use]
    pub fn render(&self) -> String {
        let mut text = format!("\n{INJECTED_HEADER}\n");
        for directive in &self.directives {
            text.push_str(directive);
            text.push('\n');
        }
        text
    }
}
