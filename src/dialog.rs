//! Operator interaction seam.
//!
//! Components never talk to the terminal directly; they ask a [`Dialog`].
//! The terminal implementation lives in [`crate::ui`], tests script one.
//!
//! Cancelling a prompt and submitting an empty value are the same thing:
//! `Ok(None)`. `Err` is reserved for the terminal itself failing.

use std::path::Path;

use crate::error::Result;

/// One selectable menu row: a stable tag returned on selection and the
/// label shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuItem {
    pub tag: String,
    pub label: String,
}

impl MenuItem {
    pub fn new(tag: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            label: label.into(),
        }
    }
}

pub trait Dialog {
    /// Pick one of `items`; returns its tag. `default` is the tag highlighted
    /// first.
    fn menu(
        &mut self,
        title: &str,
        text: &str,
        items: &[MenuItem],
        default: Option<&str>,
    ) -> Result<Option<String>>;

    /// Free text, pre-filled with `initial`.
    fn input(&mut self, title: &str, prompt: &str, initial: &str) -> Result<Option<String>>;

    /// Masked text.
    fn password(&mut self, title: &str, prompt: &str) -> Result<Option<String>>;

    /// Yes/no. Cancel is "no".
    fn confirm(&mut self, title: &str, text: &str) -> Result<bool>;

    /// Blocking message box.
    fn message(&mut self, title: &str, text: &str) -> Result<()>;

    /// Non-blocking status box shown while work happens.
    fn info(&mut self, title: &str, text: &str) -> Result<()>;

    /// Scrollable view of a file.
    fn text_file(&mut self, title: &str, path: &Path) -> Result<()>;

    /// Give the terminal back, e.g. before an interactive child runs. The
    /// next prompt reclaims it.
    fn suspend(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<D: Dialog + ?Sized> Dialog for &mut D {
    fn menu(
        &mut self,
        title: &str,
        text: &str,
        items: &[MenuItem],
        default: Option<&str>,
    ) -> Result<Option<String>> {
        (**self).menu(title, text, items, default)
    }

    fn input(&mut self, title: &str, prompt: &str, initial: &str) -> Result<Option<String>> {
        (**self).input(title, prompt, initial)
    }

    fn password(&mut self, title: &str, prompt: &str) -> Result<Option<String>> {
        (**self).password(title, prompt)
    }

    fn confirm(&mut self, title: &str, text: &str) -> Result<bool> {
        (**self).confirm(title, text)
    }

    fn message(&mut self, title: &str, text: &str) -> Result<()> {
        (**self).message(title, text)
    }

    fn info(&mut self, title: &str, text: &str) -> Result<()> {
        (**self).info(title, text)
    }

    fn text_file(&mut self, title: &str, path: &Path) -> Result<()> {
        (**self).text_file(title, path)
    }

    fn suspend(&mut self) -> Result<()> {
        (**self).suspend()
    }
}

/// Treat empty or whitespace-only answers as no answer.
pub fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
