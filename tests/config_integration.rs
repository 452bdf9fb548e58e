// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Loader tests driven by real configuration files and environment variables.

mod common;

use std::io::Write;

use common::start_with_loader;
use resource_proxy::{AuthMode, ProxyLoader};
use serial_test::serial;
use wiremock::matchers::{header, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn yaml_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[tokio::test]
#[serial]
async fn test_env_overrides_file_values() {
    let file = yaml_file(
        r#"
server:
  host: 127.0.0.1
  port: 8080
proxy:
  path: /proxy/proxy.ashx
  timeout: 30
"#,
    );

    unsafe {
        std::env::set_var("RPINTEG_PROXY__TIMEOUT", "3");
        std::env::set_var("RPINTEG_SERVER__PORT", "9191");
    }

    let result = ProxyLoader::new()
        .with_config_file(file.path().to_str().unwrap())
        .with_env_prefix("RPINTEG_")
        .build()
        .await;

    unsafe {
        std::env::remove_var("RPINTEG_PROXY__TIMEOUT");
        std::env::remove_var("RPINTEG_SERVER__PORT");
    }

    let proxy = result.unwrap();
    assert_eq!(proxy.config().get::<u64>("proxy.timeout").unwrap(), Some(3));
    assert_eq!(proxy.server().config().port, 9191);
    assert_eq!(proxy.server().config().host, "127.0.0.1");
}

#[tokio::test]
#[serial]
async fn test_user_login_rule_from_yaml_file() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("authorization", "Basic c3ZjOnMzY3JldA=="))
        .respond_with(ResponseTemplate::new(200).set_body_string("secured"))
        .expect(1)
        .mount(&backend)
        .await;

    let file = yaml_file(&format!(
        r#"
proxy:
  allowed_referrers:
    - "*"
  server_urls:
    - url: "{}/secure"
      username: svc
      password: s3cret
"#,
        backend.uri()
    ));

    let running = start_with_loader(
        ProxyLoader::new().with_config_file(file.path().to_str().unwrap()),
    )
    .await;

    let rule = &running.proxy.core().rules().rules()[0];
    assert!(matches!(rule.mode, AuthMode::UserLogin { .. }));

    let response = reqwest::Client::new()
        .get(running.endpoint(&format!("{}/secure/report", backend.uri())))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "secured");
}

#[tokio::test]
async fn test_conflicting_credentials_fail_the_build() {
    let file = yaml_file(
        r#"
proxy:
  server_urls:
    - url: https://services.example.com
      username: svc
      password: pw
      client_id: id
      client_secret: secret
"#,
    );

    let result = ProxyLoader::new()
        .with_config_file(file.path().to_str().unwrap())
        .build()
        .await;

    assert!(result.is_err());
}
