//! Content collaborators: template substitution and translation.
//!
//! Both are optional. Without a templater, template-eligible endpoints are
//! served verbatim; without a translator, language never enters cache keys
//! or ETags.

pub mod template;
pub mod translate;

pub use template::{Rendered, TemplateContext, Templater, VariableTemplater};
pub use translate::{negotiate_language, DictionaryTranslator, Translator};
