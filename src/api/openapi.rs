use super::handlers::{
    accounts, assignments, directory, health, media, messages, notifications, recovery,
    verification,
};
use utoipa::openapi::{
    ComponentsBuilder, Contact, InfoBuilder, License, OpenApiBuilder, Tag,
    security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_axum::{router::OpenApiRouter, routes};

const TAGS: [(&str, &str); 9] = [
    ("health", "Service and store health"),
    ("accounts", "Registration, sessions and profile edits"),
    ("verification", "Review of teachers, mentors and local admins"),
    ("directory", "Institution and account listings"),
    ("messages", "Question threads, replies, votes and reports"),
    ("media", "Image uploads"),
    ("assignments", "Assignments, submissions and grading"),
    ("notifications", "Per-account notification ledger"),
    ("password-reset", "Password recovery by one-time code"),
];

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
///
/// Handlers sharing a path must be registered in the same `routes!` call.
/// Routes added outside (like `OPTIONS /health`) are not documented.
pub(crate) fn api_router() -> OpenApiRouter {
    let mut router = OpenApiRouter::with_openapi(cargo_openapi())
        .routes(routes!(health::health))
        .routes(routes!(accounts::register))
        .routes(routes!(accounts::login))
        .routes(routes!(accounts::logout))
        .routes(routes!(accounts::edit_details))
        .routes(routes!(verification::verify))
        .routes(routes!(verification::reject))
        .routes(routes!(directory::schools))
        .routes(routes!(directory::mentors))
        .routes(routes!(directory::local_admins))
        .routes(routes!(directory::teachers))
        .routes(routes!(directory::students))
        .routes(routes!(messages::post_message, messages::get_message))
        .routes(routes!(messages::list_messages))
        .routes(routes!(messages::author_messages))
        .routes(routes!(messages::post_reply))
        .routes(routes!(messages::upvote))
        .routes(routes!(messages::downvote))
        .routes(routes!(messages::report))
        .routes(routes!(media::upload))
        .routes(routes!(media::fetch))
        .routes(routes!(
            assignments::post_assignment,
            assignments::get_assignment,
            assignments::delete_assignment
        ))
        .routes(routes!(
            assignments::submit_assignment,
            assignments::own_submission
        ))
        .routes(routes!(assignments::assignment_submissions))
        .routes(routes!(assignments::list_assignments))
        .routes(routes!(assignments::teacher_assignments))
        .routes(routes!(notifications::list_notifications))
        .routes(routes!(notifications::clear_notification))
        .routes(routes!(recovery::request_otp))
        .routes(routes!(recovery::verify_otp));

    let doc = router.get_openapi_mut();
    doc.tags = Some(
        TAGS.iter()
            .map(|(name, description)| {
                let mut tag = Tag::new(*name);
                tag.description = Some((*description).to_string());
                tag
            })
            .collect(),
    );
    doc.components
        .get_or_insert_with(|| ComponentsBuilder::new().build())
        .add_security_scheme(
            "bearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );

    router
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    // Use Cargo.toml metadata instead of the utoipa-axum crate info defaults.
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = cargo_license();

    OpenApiBuilder::new().info(info).build()
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let authors = env!("CARGO_PKG_AUTHORS");
    let primary = authors.split(';').next().map(str::trim)?;
    if primary.is_empty() {
        return None;
    }

    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    Some(value.trim()).filter(|trimmed| !trimmed.is_empty())
}

fn non_empty(value: &str) -> Option<&str> {
    Some(value).filter(|value| !value.is_empty())
}

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
    fn openapi_info_from_cargo() {
        let spec = openapi();
        assert_eq!(spec.info.title, env!("CARGO_PKG_NAME"));
        assert_eq!(spec.info.version, env!("CARGO_PKG_VERSION"));

        let contact = spec.info.contact;
        assert!(contact.is_some());
        if let Some(contact) = contact {
            assert_eq!(contact.name.as_deref(), Some("Team EduResolve"));
            assert_eq!(contact.email.as_deref(), Some("team@eduresolve.dev"));
        }

        let license = spec.info.license;
        assert!(license.is_some());
        if let Some(license) = license {
            assert_eq!(license.name, "BSD-3-Clause");
        }
    }

    #[test]
    fn parse_author_handles_missing_parts() {
        assert_eq!(
            parse_author("Ada <ada@example.com>"),
            (Some("Ada"), Some("ada@example.com"))
        );
        assert_eq!(parse_author("Ada"), (Some("Ada"), None));
        assert_eq!(parse_author("<ada@example.com>"), (None, Some("ada@example.com")));
    }

    #[test]
    fn openapi_tags_paths_and_security() {
        let spec = openapi();
        let tags = spec.tags.clone().unwrap_or_default();
        for (name, _) in TAGS {
            assert!(tags.iter().any(|tag| tag.name == name), "missing tag {name}");
        }
        for path in [
            "/health",
            "/v1/accounts/{role}/register",
            "/v1/messages/{id}",
            "/v1/assignments/{id}/submission",
            "/v1/password-reset/verify",
            "/v1/media/{key}",
        ] {
            assert!(spec.paths.paths.contains_key(path), "missing path {path}");
        }
        let schemes = spec
            .components
            .map(|components| components.security_schemes)
            .unwrap_or_default();
        assert!(schemes.contains_key("bearer"));
    }
}
