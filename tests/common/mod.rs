//! Shared fixtures for the facade integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;

use sign_relay::{Artifact, Credentials, Origin, RepositoryData, SecretToken, SigningRequest, Slug};
use uuid::Uuid;

pub const ORGANIZATION_ID: &str = "8f1d6f8e-4b5c-4b1e-9a36-3b7c2b7d0f11";
pub const REQUEST_ID: &str = "0f4a2b7e-3c1d-4e5f-8a9b-0c1d2e3f4a5b";

pub fn organization_id() -> Uuid {
    Uuid::parse_str(ORGANIZATION_ID).unwrap()
}

pub fn request_id() -> Uuid {
    Uuid::parse_str(REQUEST_ID).unwrap()
}

pub fn credentials() -> Credentials {
    Credentials::new(
        SecretToken::new("user-token".to_string()),
        SecretToken::new("trusted-token".to_string()),
    )
}

pub fn request() -> SigningRequest {
    SigningRequest {
        organization_id: organization_id(),
        project_slug: Slug::new("desktop-app").unwrap(),
        signing_policy_slug: Slug::new("release-signing").unwrap(),
        artifact_configuration_slug: None,
        description: None,
        origin: Origin {
            repository: RepositoryData {
                source_control_kind: "git".to_string(),
                repository_url: "https://git.example/desktop-app.git".to_string(),
                branch_name: "main".to_string(),
                commit_id: "4f2a9c1".to_string(),
            },
            build_url: "https://ci.example/job/desktop-app/42/".to_string(),
            build_settings: b"<pipeline/>".to_vec(),
        },
        artifact: Artifact {
            file_name: "app.exe".to_string(),
            bytes: b"unsigned".to_vec(),
        },
        parameters: BTreeMap::new(),
    }
}
