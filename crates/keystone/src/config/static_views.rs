//! Static file views.
//!
//! `add_static_view` registers an ordinary named view whose callable serves
//! files from a directory, resolving the request's remaining subpath against
//! it. Asset packaging and URL generation are outside this core; the view
//! only needs a directory on disk.

use crate::config::error::ConfigError;
use crate::config::views::ViewConfig;
use crate::config::Configurator;
use keystone_dispatch::{DispatchError, RawView, Request, Response, ViewMeta, ViewOutput};
use std::path::{Component, Path, PathBuf};

/// Guessed content type by file extension.
fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|extension| extension.to_str())
        .map(|extension| extension.to_ascii_lowercase())
        .as_deref()
    {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") => "text/javascript; charset=utf-8",
        Some("json") => "application/json; charset=utf-8",
        Some("txt") => "text/plain; charset=utf-8",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}

/// Serves one request's subpath from the directory.
fn serve_from(directory: &Path, request: &Request) -> Result<ViewOutput, DispatchError> {
    if request.subpath.is_empty() {
        return Err(DispatchError::not_found(request.path_info.clone()));
    }

    let mut target = PathBuf::from(directory);
    for segment in &request.subpath {
        let segment = Path::new(segment);
        // Reject traversal and absolute segments outright.
        if segment
            .components()
            .any(|component| !matches!(component, Component::Normal(_)))
        {
            return Err(DispatchError::not_found(request.path_info.clone()));
        }
        target.push(segment);
    }

    if !target.is_file() {
        return Err(DispatchError::not_found(request.path_info.clone()));
    }
    let body = std::fs::read(&target)
        .map_err(|error| DispatchError::Handler(anyhow::Error::new(error)))?;
    let mut response = Response::ok();
    response.set_header("Content-Type", content_type_for(&target));
    response.body = body;
    Ok(ViewOutput::Response(response))
}

impl Configurator {
    /// Registers a named view serving files from `directory`.
    pub fn add_static_view(
        &mut self,
        name: &str,
        directory: impl Into<PathBuf>,
    ) -> Result<(), ConfigError> {
        let directory = directory.into();
        let meta = ViewMeta::new(name).with_module(module_path!());
        let raw = RawView::request_only(meta, move |request| serve_from(&directory, request));
        self.add_view(ViewConfig::new().view(raw).name(name))
    }
}
