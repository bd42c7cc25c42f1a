use super::handlers::{auth, health};
use utoipa::openapi::{
    ContactBuilder, Info, InfoBuilder, LicenseBuilder, OpenApi, OpenApiBuilder, Tag,
};
use utoipa_axum::{router::OpenApiRouter, routes};

/// The document served at `/api-docs/openapi.json` and printed by the `openapi` binary.
#[must_use]
pub fn openapi() -> OpenApi {
    api_router()
        .nest("/api", protected_router())
        .split_for_parts()
        .1
}

/// Public, documented routes.
///
/// Aliases, the local dev helpers and `/` are added in `api::app` and stay
/// out of the document.
pub(crate) fn api_router() -> OpenApiRouter {
    let mut router = OpenApiRouter::with_openapi(OpenApiBuilder::new().info(info()).build())
        .routes(routes!(health::health))
        .routes(routes!(auth::login::login))
        .routes(routes!(auth::callback::callback))
        .routes(routes!(auth::logout::logout));

    router.get_openapi_mut().tags = Some(vec![
        tag("health", "Service and database status"),
        tag("auth", "Google login and cookie sessions"),
        tag("session", "Routes behind the session guard"),
    ]);

    router
}

/// Documented routes served under `/api` behind the session guard.
pub(crate) fn protected_router() -> OpenApiRouter {
    OpenApiRouter::new().routes(routes!(auth::guard::me))
}

fn tag(name: &str, description: &str) -> Tag {
    let mut tag = Tag::new(name);
    tag.description = Some(description.to_string());
    tag
}

/// Title, version, contact and license straight from the package manifest.
fn info() -> Info {
    let (name, email) = parse_author(first_author(env!("CARGO_PKG_AUTHORS")));
    let contact = (name.is_some() || email.is_some())
        .then(|| ContactBuilder::new().name(name).email(email).build());

    let license = non_empty(env!("CARGO_PKG_LICENSE").trim()).map(|spdx| {
        LicenseBuilder::new()
            .name(spdx)
            .identifier(Some(spdx))
            .build()
    });

    InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(non_empty(env!("CARGO_PKG_DESCRIPTION").trim()))
        .contact(contact)
        .license(license)
        .build()
}

/// Cargo joins multiple authors with `:`.
fn first_author(authors: &str) -> &str {
    authors.split(':').next().unwrap_or_default().trim()
}

fn non_empty(value: &str) -> Option<&str> {
    (!value.is_empty()).then_some(value)
}

/// Split `Name <email>` into its parts.
fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    match author.split_once('<') {
        Some((name, email)) => (
            non_empty(name.trim()),
            non_empty(email.trim_end_matches('>').trim()),
        ),
        None => (non_empty(author.trim()), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_comes_from_manifest() {
        let doc = openapi();
        assert_eq!(doc.info.title, "salesdesk");
        assert_eq!(doc.info.version, env!("CARGO_PKG_VERSION"));

        let contact = doc.info.contact.unwrap_or_default();
        assert_eq!(contact.name.as_deref(), Some("Team Salesdesk"));
        assert_eq!(contact.email.as_deref(), Some("team@salesdesk.dev"));

        let license = doc.info.license.map(|license| license.name);
        assert_eq!(license.as_deref(), Some("BSD-3-Clause"));
    }

    #[test]
    fn documents_auth_routes() {
        let doc = openapi();
        for path in [
            "/health",
            "/auth/login",
            "/auth/callback",
            "/auth/logout",
            "/api/me",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
        for alias in ["/auth/google", "/dev/login-as", "/"] {
            assert!(!doc.paths.paths.contains_key(alias), "{alias} documented");
        }
    }

    #[test]
    fn author_forms() {
        assert_eq!(
            parse_author("Team Salesdesk <team@salesdesk.dev>"),
            (Some("Team Salesdesk"), Some("team@salesdesk.dev"))
        );
        assert_eq!(parse_author("Solo"), (Some("Solo"), None));
        assert_eq!(parse_author("<a@b.c>"), (None, Some("a@b.c")));
        assert_eq!(first_author("A <a@x>:B <b@x>"), "A <a@x>");
        assert_eq!(first_author(""), "");
    }
}
