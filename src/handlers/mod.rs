pub mod listing;

use crate::http::{Response, Route};
use crate::storage::FileStore;

pub use listing::ListingTemplate;

/// Turns a completed request's target into a response, using the file store.
pub struct Service<F> {
    pub store: F,
    pub template: ListingTemplate,
}

impl<F: FileStore> Service<F> {
    pub fn new(store: F, template: ListingTemplate) -> Self {
        Self { store, template }
    }

    pub fn respond(&self, target: &str) -> Response {
        let route = Route::resolve(target);
        tracing::debug!(resource = target, ?route, "resolved route");

        match route {
            Route::Listing => self.listing(),
            Route::Download(name) => self.download(&name),
            Route::Delete(name) => {
                match self.store.delete(&name) {
                    Ok(()) => tracing::info!(file = %name, "deleted file"),
                    Err(e) => tracing::warn!(file = %name, error = %e, "delete failed"),
                }
                Response::redirect("/")
            }
            Route::Redirect => Response::redirect("/"),
        }
    }

    fn listing(&self) -> Response {
        match self.store.list() {
            Ok(names) => Response::listing(self.template.render(&names).into_bytes()),
            Err(e) => {
                tracing::error!(error = %e, "cannot list upload directory");
                Response::error(500, "Internal Server Error")
            }
        }
    }

    fn download(&self, name: &str) -> Response {
        let file = match self.store.open(name) {
            Ok(file) => file,
            Err(e) => {
                tracing::info!(file = name, error = %e, "download unavailable, redirecting");
                return Response::redirect("/");
            }
        };
        match self.store.size(&file) {
            Ok(len) => Response::download(file, len),
            Err(e) => {
                tracing::warn!(file = name, error = %e, "cannot size file, redirecting");
                self.store.close(file);
                Response::redirect("/")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::ResponseKind;
    use crate::storage::DirStore;

    fn service() -> (tempfile::TempDir, Service<DirStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = DirStore::new(dir.path()).unwrap();
        (dir, Service::new(store, ListingTemplate::default()))
    }

    #[test]
    fn missing_download_matches_unroutable() {
        let (_dir, svc) = service();
        let missing = svc.respond("/download/nope.txt");
        let unroutable = svc.respond("/whatever");
        assert_eq!(missing.kind, ResponseKind::Redirect);
        assert_eq!(missing.head(), unroutable.head());
    }

    #[test]
    fn delete_always_redirects() {
        let (dir, svc) = service();
        std::fs::write(dir.path().join("x.txt"), b"x").unwrap();

        assert_eq!(svc.respond("/delete/x.txt").kind, ResponseKind::Redirect);
        assert!(!dir.path().join("x.txt").exists());
        assert_eq!(svc.respond("/delete/x.txt").kind, ResponseKind::Redirect);
    }

    #[test]
    fn traversal_download_redirects() {
        let (_dir, svc) = service();
        assert_eq!(svc.respond("/download/..%2Fsecret").kind, ResponseKind::Redirect);
    }

    #[test]
    fn listing_shows_files() {
        let (dir, svc) = service();
        std::fs::write(dir.path().join("shown.txt"), b"x").unwrap();
        let resp = svc.respond("/");
        assert_eq!(resp.kind, ResponseKind::FileListing);
        let head = String::from_utf8(resp.head().to_vec()).unwrap();
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        match resp.body() {
            crate::http::Body::InMemory(html) => {
                assert!(String::from_utf8_lossy(html).contains("shown.txt"));
                assert!(head.contains(&format!("Content-Length: {}\r\n", html.len())));
            }
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[test]
    fn listing_of_vanished_directory_is_an_error() {
        let (dir, svc) = service();
        std::fs::remove_dir(dir.path()).unwrap();
        assert_eq!(svc.respond("/").kind, ResponseKind::Error);
    }
}
