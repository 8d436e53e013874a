//! HTTP routes owned by capability modules.
//!
//! Some modules expose an extra HTTP endpoint next to the WebSocket protocol
//! (the camera's video stream, for example).  Routes are namespaced by module
//! name and only exist while the module is loaded: the lifecycle manager
//! mounts them on load and unmounts them on unload.
//!
//! ```text
//! module "cam", route GET "stream"  →  GET /cam/stream
//! module "cam", route GET ""        →  GET /cam
//! ```

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

/// Error type for route table operations.
#[derive(Debug, Error, PartialEq)]
pub enum RouteError {
    /// Another module already owns the path.
    #[error("{method} {path} is already mounted by module {owner}")]
    Conflict {
        method: HttpMethod,
        path: String,
        owner: String,
    },
}

/// HTTP method of a module route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HttpMethod {
    Get,
    Post,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        })
    }
}

/// A route as declared by a module, relative to the module's namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRoute {
    pub method: HttpMethod,
    pub path: String,
}

impl HttpRoute {
    /// Declares a `GET` route.
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            path: path.into(),
        }
    }

    /// Declares a `POST` route.
    pub fn post(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Post,
            path: path.into(),
        }
    }

    /// Absolute path of this route under `module`'s namespace.
    pub fn mounted_path(&self, module: &str) -> String {
        let relative = self.path.trim_matches('/');
        if relative.is_empty() {
            format!("/{module}")
        } else {
            format!("/{module}/{relative}")
        }
    }
}

/// All routes currently mounted, keyed by `(method, absolute path)`.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: BTreeMap<(HttpMethod, String), String>,
}

impl RouteTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mounts every route of `module`.
    ///
    /// Either all routes are mounted or none is.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::Conflict`] if another module owns one of the paths.
    pub fn mount(&mut self, module: &str, routes: &[HttpRoute]) -> Result<(), RouteError> {
        let keys: Vec<(HttpMethod, String)> = routes
            .iter()
            .map(|r| (r.method, r.mounted_path(module)))
            .collect();

        for key in &keys {
            if let Some(owner) = self.routes.get(key) {
                if owner != module {
                    return Err(RouteError::Conflict {
                        method: key.0,
                        path: key.1.clone(),
                        owner: owner.clone(),
                    });
                }
            }
        }

        for key in keys {
            self.routes.insert(key, module.to_string());
        }
        Ok(())
    }

    /// Removes every route owned by `module`.  Returns how many were removed.
    pub fn unmount(&mut self, module: &str) -> usize {
        let before = self.routes.len();
        self.routes.retain(|_, owner| owner != module);
        before - self.routes.len()
    }

    /// Returns the module that serves `method path`, if mounted.
    pub fn resolve(&self, method: HttpMethod, path: &str) -> Option<&str> {
        self.routes
            .get(&(method, path.to_string()))
            .map(String::as_str)
    }

    /// Absolute paths currently mounted, in sorted order.
    pub fn paths(&self) -> Vec<String> {
        self.routes.keys().map(|(_, path)| path.clone()).collect()
    }

    /// Number of mounted routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// `true` when nothing is mounted.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mounted_path_prefixes_module_name() {
        assert_eq!(HttpRoute::get("stream").mounted_path("cam"), "/cam/stream");
        assert_eq!(HttpRoute::get("/stream/").mounted_path("cam"), "/cam/stream");
    }

    #[test]
    fn test_empty_path_mounts_at_module_root() {
        assert_eq!(HttpRoute::get("").mounted_path("cam"), "/cam");
    }

    #[test]
    fn test_mount_then_resolve() {
        // Arrange
        let mut table = RouteTable::new();

        // Act
        table.mount("cam", &[HttpRoute::get("stream")]).unwrap();

        // Assert
        assert_eq!(table.resolve(HttpMethod::Get, "/cam/stream"), Some("cam"));
        assert_eq!(table.resolve(HttpMethod::Post, "/cam/stream"), None);
    }

    #[test]
    fn test_unmount_removes_only_that_modules_routes() {
        // Arrange
        let mut table = RouteTable::new();
        table.mount("cam", &[HttpRoute::get("stream"), HttpRoute::get("")]).unwrap();
        table.mount("vehicle", &[HttpRoute::post("stop")]).unwrap();

        // Act
        let removed = table.unmount("cam");

        // Assert
        assert_eq!(removed, 2);
        assert_eq!(table.paths(), vec!["/vehicle/stop".to_string()]);
    }

    #[test]
    fn test_mount_same_module_twice_is_idempotent() {
        let mut table = RouteTable::new();
        table.mount("cam", &[HttpRoute::get("stream")]).unwrap();
        table.mount("cam", &[HttpRoute::get("stream")]).unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_conflicting_mount_leaves_table_unchanged() {
        // Arrange: module "a" owns /a/b
        let mut table = RouteTable::new();
        table.mount("a", &[HttpRoute::get("b")]).unwrap();

        // Act: module "a/b" maps its root onto the same path
        let result = table.mount("a/b", &[HttpRoute::get("other"), HttpRoute::get("")]);

        // Assert
        assert_eq!(
            result,
            Err(RouteError::Conflict {
                method: HttpMethod::Get,
                path: "/a/b".to_string(),
                owner: "a".to_string(),
            })
        );
        assert_eq!(table.len(), 1, "no route of the failed mount may remain");
        assert_eq!(table.resolve(HttpMethod::Get, "/a/b/other"), None);
    }

    #[test]
    fn test_empty_table() {
        let table = RouteTable::new();
        assert!(table.is_empty());
        assert!(table.paths().is_empty());
    }
}
