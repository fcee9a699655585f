//! Tests for the protocol module
//!
//! These tests pin the control message wire format and origin handling.

#[cfg(test)]
mod tests {
    use super::super::*;
    use http::Method;
    use serde_json::json;
    use url::Url;

    #[test]
    fn test_origin_drops_path_and_default_port() {
        let origin = Origin::parse("https://app.example:443/some/path?q=1").unwrap();
        assert_eq!(origin.as_str(), "https://app.example");
        assert_eq!(origin.to_string(), "https://app.example");
    }

    #[test]
    fn test_origin_keeps_explicit_port() {
        let origin = Origin::parse("http://127.0.0.1:8081/").unwrap();
        assert_eq!(origin.as_str(), "http://127.0.0.1:8081");
    }

    #[test]
    fn test_opaque_origin_rejected() {
        let result = Origin::parse("data:text/plain,hello");
        assert!(matches!(result, Err(DetourError::InvalidUrl(_))));
    }

    #[test]
    fn test_origin_matches() {
        let origin = Origin::parse("https://app.example").unwrap();
        assert!(origin.matches(&Url::parse("https://app.example/a/b").unwrap()));
        assert!(!origin.matches(&Url::parse("http://app.example/a/b").unwrap()));
        assert!(!origin.matches(&Url::parse("https://app.example:8443/").unwrap()));
    }

    #[test]
    fn test_rewrite_preserves_path_query_fragment() {
        let mirror = Origin::parse("https://mirror.example:8443").unwrap();
        let cases = [
            "https://app.example/",
            "https://app.example/quotes/ABC?range=1d&interval=5m#chart",
            "https://app.example/a%20b/c?x=%2F&y=#",
            "https://app.example/path;params?",
        ];

        for input in cases {
            let url = Url::parse(input).unwrap();
            let rewritten = mirror.rewrite(&url).unwrap();
            assert_eq!(rewritten.origin().ascii_serialization(), "https://mirror.example:8443");
            assert_eq!(
                &rewritten[url::Position::BeforePath..],
                &url[url::Position::BeforePath..],
                "tail changed for {}",
                input
            );
        }
    }

    #[test]
    fn test_origin_join() {
        let origin = Origin::parse("https://app.example").unwrap();
        let url = origin.join("/favicon.ico").unwrap();
        assert_eq!(url.as_str(), "https://app.example/favicon.ico");
    }

    #[test]
    fn test_origin_serde_as_string() {
        let origin = Origin::parse("https://app.example").unwrap();
        assert_eq!(serde_json::to_value(&origin).unwrap(), json!("https://app.example"));

        let parsed: Origin = serde_json::from_value(json!("https://app.example/x")).unwrap();
        assert_eq!(parsed, origin);

        assert!(serde_json::from_value::<Origin>(json!("not a url")).is_err());
    }

    #[test]
    fn test_candidates_from_origins() {
        let candidates = CandidateEndpoint::from_origins(vec![
            Origin::parse("https://a.example").unwrap(),
            Origin::parse("https://b.example").unwrap(),
        ]);
        assert_eq!(candidates.len(), 2);
        assert!(candidates[0].is_primary());
        assert_eq!(candidates[1].priority, 1);
        assert!(!candidates[1].is_primary());
    }

    #[test]
    fn test_request_safe_read() {
        let url = Url::parse("https://app.example/").unwrap();
        assert!(InterceptedRequest::get(url.clone()).is_safe_read());
        assert!(InterceptedRequest::new(Method::HEAD, url.clone(), RequestKind::Resource).is_safe_read());
        assert!(!InterceptedRequest::new(Method::POST, url.clone(), RequestKind::Resource).is_safe_read());
        assert!(!InterceptedRequest::new(Method::OPTIONS, url, RequestKind::Resource).is_safe_read());
    }

    #[test]
    fn test_request_retarget_keeps_everything_but_url() {
        let url = Url::parse("https://app.example/a").unwrap();
        let req = InterceptedRequest::document(url).with_body(bytes::Bytes::from_static(b"x"));
        let target = Url::parse("https://b.example/a").unwrap();
        let moved = req.retarget(target.clone());
        assert_eq!(moved.url, target);
        assert!(moved.is_document());
        assert_eq!(moved.body, req.body);
    }

    #[test]
    fn test_control_message_wire_format() {
        assert_eq!(
            serde_json::to_value(ControlMessage::ForceActivate).unwrap(),
            json!({"type": "FORCE_ACTIVATE"})
        );
        assert_eq!(
            serde_json::to_value(ControlMessage::VersionQuery).unwrap(),
            json!({"type": "VERSION_QUERY"})
        );
        let sweep: ControlMessage = serde_json::from_value(json!({"type": "ENDPOINT_SWEEP"})).unwrap();
        assert_eq!(sweep, ControlMessage::EndpointSweep);
        let purge: ControlMessage = serde_json::from_value(json!({"type": "PURGE"})).unwrap();
        assert_eq!(purge, ControlMessage::Purge);
    }

    #[test]
    fn test_unknown_control_message_rejected() {
        assert!(serde_json::from_value::<ControlMessage>(json!({"type": "REBOOT"})).is_err());
    }

    #[test]
    fn test_only_force_activate_skips_reply() {
        assert!(!ControlMessage::ForceActivate.expects_reply());
        assert!(ControlMessage::VersionQuery.expects_reply());
        assert!(ControlMessage::EndpointSweep.expects_reply());
        assert!(ControlMessage::Purge.expects_reply());
    }

    #[test]
    fn test_reply_wire_format() {
        let version = ControlReply::Version {
            version: "v2".to_string(),
        };
        assert_eq!(serde_json::to_value(&version).unwrap(), json!({"version": "v2"}));

        let sweep = ControlReply::Sweep {
            domains: vec![DomainStatus {
                domain: "https://a.example".to_string(),
                available: true,
            }],
        };
        assert_eq!(
            serde_json::to_value(&sweep).unwrap(),
            json!({"domains": [{"domain": "https://a.example", "available": true}]})
        );

        assert_eq!(serde_json::to_value(ControlReply::purged()).unwrap(), json!({"success": true}));
        assert_eq!(
            serde_json::to_value(ControlReply::purge_failed("disk full")).unwrap(),
            json!({"success": false, "error": "disk full"})
        );
        assert_eq!(
            serde_json::to_value(ControlReply::error("boom")).unwrap(),
            json!({"error": "boom"})
        );
    }

    #[test]
    fn test_reply_parsing_picks_right_variant() {
        let failed: ControlReply =
            serde_json::from_value(json!({"success": false, "error": "locked"})).unwrap();
        assert_eq!(failed, ControlReply::purge_failed("locked"));
        assert!(failed.is_error());

        let error: ControlReply = serde_json::from_value(json!({"error": "boom"})).unwrap();
        assert_eq!(error, ControlReply::error("boom"));

        let ok: ControlReply = serde_json::from_value(json!({"success": true})).unwrap();
        assert!(!ok.is_error());
    }

    #[test]
    fn test_error_is_network() {
        assert!(DetourError::Transport("refused".to_string()).is_network());
        assert!(DetourError::Timeout(5000).is_network());
        assert!(!DetourError::InvalidUrl("x".to_string()).is_network());
        assert!(!DetourError::ControlChannelClosed.is_network());
    }
}
