//! Template rendering contract.
//!
//! conduit ships no template language. Plug one in by implementing [`View`]
//! and handing it to [`Application::set_view`](crate::Application::set_view);
//! [`Response::render`](crate::Response::render) then finishes the response
//! with whatever string the view produces.

use std::collections::HashMap;
use std::path::Path;

use crate::error::Result;

/// Values exposed to a template.
pub type Locals = HashMap<String, String>;

/// Everything a [`View`] needs to render one template.
#[derive(Debug)]
pub struct Template<'a> {
    pub name: &'a str,
    pub layout: Option<&'a str>,
    pub root: &'a Path,
    pub locals: &'a Locals,
}

/// A template renderer.
pub trait View: Send + Sync + 'static {
    fn render(&self, template: &Template<'_>) -> Result<String>;
}
