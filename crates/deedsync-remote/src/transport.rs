use std::io;

use deedsync_core::{
    DocNumber, Partition, ProbeOutcome, RemoteProbe, TransportErrorKind, TransportFailure,
};

use crate::{RemoteConfig, RemoteError, SessionCredential};

const ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Blocking form-POST lookup against the registry, one request per probe.
///
/// Redirects are never followed: the registry answers an expired session by
/// redirecting to its login page.
pub struct HttpProbe {
    agent: ureq::Agent,
    config: RemoteConfig,
    url: String,
    cookie: String,
}

impl HttpProbe {
    /// Resolve the session token once and build the agent.
    ///
    /// # Errors
    /// Returns an error when the credential cannot be resolved or the base URL is empty.
    pub fn new(config: RemoteConfig, credential: &SessionCredential) -> Result<Self, RemoteError> {
        if config.base_url.trim().is_empty() {
            return Err(RemoteError::InvalidConfig("base_url must not be empty".to_string()));
        }
        let token = credential.resolve()?;
        let agent = ureq::AgentBuilder::new()
            .timeout(config.timeout())
            .redirects(0)
            .user_agent(&config.user_agent)
            .build();
        tracing::debug!(url = %config.url(), timeout_secs = config.timeout_secs, "registry probe configured");

        Ok(Self {
            agent,
            url: config.url(),
            cookie: format!("{}={token}", config.session_cookie),
            config,
        })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl RemoteProbe for HttpProbe {
    fn probe(&self, partition: &Partition, doc_number: DocNumber, registration_year: i32) -> ProbeOutcome {
        let doc = doc_number.to_string();
        let year = registration_year.to_string();

        let mut request =
            self.agent.post(&self.url).set("Cookie", &self.cookie).set("Accept", ACCEPT);
        if let Some(origin) = &self.config.origin {
            request = request.set("Origin", origin);
        }
        if let Some(referer) = &self.config.referer {
            request = request.set("Referer", referer);
        }

        let result = request.send_form(&[
            ("deedsel", "1"),
            ("districtCode", partition.district_code.as_str()),
            ("sroCode", partition.id.as_str()),
            ("doctno", doc.as_str()),
            ("regyear", year.as_str()),
        ]);

        match result {
            Ok(response) => {
                let status = response.status();
                match response.into_string() {
                    Ok(body) => classify_response(status, &body, &self.config),
                    Err(err) => ProbeOutcome::TransportError(io_failure(&err)),
                }
            }
            Err(ureq::Error::Status(status, response)) => {
                let body = response.into_string().unwrap_or_default();
                classify_response(status, &body, &self.config)
            }
            Err(ureq::Error::Transport(transport)) => {
                tracing::debug!(partition = %partition.id, doc_number, error = %transport, "transport error");
                ProbeOutcome::TransportError(transport_failure(&transport))
            }
        }
    }
}

/// Map a registry response onto a probe outcome.
///
/// Only the exact not-found sentinel in a 2xx body means absence. Rejected
/// credentials (401, 403, 440, any redirect, or a 2xx login page) mean the
/// session expired. Other statuses are transient.
#[must_use]
pub fn classify_response(status: u16, body: &str, config: &RemoteConfig) -> ProbeOutcome {
    match status {
        200..=299 => {
            if body.contains(&config.not_found_sentinel) {
                ProbeOutcome::NotFound
            } else if let Some(marker) = config
                .session_expired_markers
                .iter()
                .find(|marker| !marker.is_empty() && body.contains(marker.as_str()))
            {
                ProbeOutcome::TransportError(TransportFailure::new(
                    TransportErrorKind::SessionExpired,
                    format!("response contains session marker {marker:?}"),
                ))
            } else {
                ProbeOutcome::Found(body.to_string())
            }
        }
        300..=399 => ProbeOutcome::TransportError(TransportFailure::new(
            TransportErrorKind::SessionExpired,
            format!("redirected with status {status}"),
        )),
        401 | 403 | 440 => ProbeOutcome::TransportError(TransportFailure::new(
            TransportErrorKind::SessionExpired,
            format!("credential rejected with status {status}"),
        )),
        _ => ProbeOutcome::TransportError(TransportFailure::new(
            TransportErrorKind::HttpStatus(status),
            format!("unexpected status {status}"),
        )),
    }
}

fn transport_failure(transport: &ureq::Transport) -> TransportFailure {
    let detail = transport.to_string();
    let timed_out = std::error::Error::source(transport)
        .and_then(|source| source.downcast_ref::<io::Error>())
        .is_some_and(is_timeout);
    let kind = if timed_out { TransportErrorKind::Timeout } else { TransportErrorKind::Connection };
    TransportFailure::new(kind, detail)
}

fn io_failure(err: &io::Error) -> TransportFailure {
    let kind =
        if is_timeout(err) { TransportErrorKind::Timeout } else { TransportErrorKind::Connection };
    TransportFailure::new(kind, format!("failed to read response body: {err}"))
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread::{self, JoinHandle};

    use super::*;
    use deedsync_core::PartitionId;

    fn partition() -> Partition {
        Partition {
            id: PartitionId::from("1604"),
            district_code: "16_1".to_string(),
            district: "Hyderabad".to_string(),
            display_name: "BANJARAHILLS (R.O)".to_string(),
            state: "Telangana".to_string(),
        }
    }

    fn failure_kind(outcome: &ProbeOutcome) -> Option<TransportErrorKind> {
        match outcome {
            ProbeOutcome::TransportError(failure) => Some(failure.kind),
            _ => None,
        }
    }

    fn read_request(stream: &TcpStream) -> String {
        let Ok(clone) = stream.try_clone() else {
            return String::new();
        };
        let mut reader = BufReader::new(clone);
        let mut head = String::new();
        let mut content_length = 0_usize;
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).unwrap_or(0) == 0 || line == "\r\n" {
                break;
            }
            if let Some(value) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                content_length = value.trim().parse().unwrap_or(0);
            }
            head.push_str(&line);
        }
        let mut body = vec![0_u8; content_length];
        if reader.read_exact(&mut body).is_err() {
            return head;
        }
        head + &String::from_utf8_lossy(&body)
    }

    /// Serves one canned response per accepted connection and returns the raw requests.
    fn serve(responses: Vec<(u16, String)>) -> io::Result<(String, JoinHandle<Vec<String>>)> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let base_url = format!("http://{}", listener.local_addr()?);
        let handle = thread::spawn(move || {
            let mut requests = Vec::new();
            for (status, body) in responses {
                let Ok((mut stream, _)) = listener.accept() else {
                    break;
                };
                requests.push(read_request(&stream));
                let location = if (300..400).contains(&status) {
                    "Location: /login.htm\r\n"
                } else {
                    ""
                };
                let _ = write!(
                    stream,
                    "HTTP/1.1 {status} Canned\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n{location}\r\n{body}",
                    body.len()
                );
            }
            requests
        });
        Ok((base_url, handle))
    }

    fn probe_for(base_url: String) -> Result<HttpProbe, RemoteError> {
        let config = RemoteConfig { base_url, timeout_secs: 5, ..RemoteConfig::default() };
        HttpProbe::new(config, &SessionCredential::Inline("token-123".to_string()))
    }

    #[test]
    fn sentinel_body_is_the_only_absence_signal() {
        let config = RemoteConfig::default();
        let page = format!("<html><p>{}</p></html>", config.not_found_sentinel);
        assert_eq!(classify_response(200, &page, &config), ProbeOutcome::NotFound);
        assert_eq!(
            classify_response(200, "<html>deed</html>", &config),
            ProbeOutcome::Found("<html>deed</html>".to_string())
        );
        assert_eq!(
            failure_kind(&classify_response(404, &page, &config)),
            Some(TransportErrorKind::HttpStatus(404))
        );
    }

    #[test]
    fn rejected_credentials_are_session_expiry() {
        let config = RemoteConfig::default();
        for status in [302, 401, 403, 440] {
            assert_eq!(
                failure_kind(&classify_response(status, "", &config)),
                Some(TransportErrorKind::SessionExpired),
                "status {status}"
            );
        }
        let login = "<html><h3>Session Expired. Please login again</h3></html>";
        assert_eq!(
            failure_kind(&classify_response(200, login, &config)),
            Some(TransportErrorKind::SessionExpired)
        );
    }

    #[test]
    fn server_errors_are_transient() {
        let config = RemoteConfig::default();
        let outcome = classify_response(503, "busy", &config);
        let failure = match outcome {
            ProbeOutcome::TransportError(failure) => failure,
            other => panic!("expected transport error, got {other:?}"),
        };
        assert!(!failure.is_terminal());
    }

    #[test]
    fn probe_posts_routing_form_with_session_cookie() -> Result<(), RemoteError> {
        let config = RemoteConfig::default();
        let not_found = format!("<p>{}</p>", config.not_found_sentinel);
        let (base_url, server) = serve(vec![
            (200, "<table class=\"table\"></table>".to_string()),
            (200, not_found),
        ])
        .map_err(|err| RemoteError::InvalidConfig(err.to_string()))?;
        let probe = probe_for(base_url)?;

        let found = probe.probe(&partition(), 42, 2025);
        let absent = probe.probe(&partition(), 43, 2025);
        assert!(matches!(found, ProbeOutcome::Found(_)));
        assert_eq!(absent, ProbeOutcome::NotFound);

        let requests = server.join().unwrap_or_else(|_| panic!("server thread panicked"));
        assert_eq!(requests.len(), 2);
        let first = &requests[0];
        assert!(first.starts_with("POST /getDeedDetails.htm"));
        assert!(first.contains("JSESSIONID=token-123"));
        assert!(first.contains("deedsel=1"));
        assert!(first.contains("districtCode=16_1"));
        assert!(first.contains("sroCode=1604"));
        assert!(first.contains("doctno=42"));
        assert!(first.contains("regyear=2025"));
        Ok(())
    }

    #[test]
    fn redirect_to_login_is_not_followed() -> Result<(), RemoteError> {
        let (base_url, server) = serve(vec![(302, String::new())])
            .map_err(|err| RemoteError::InvalidConfig(err.to_string()))?;
        let probe = probe_for(base_url)?;

        let outcome = probe.probe(&partition(), 7, 2025);
        assert_eq!(failure_kind(&outcome), Some(TransportErrorKind::SessionExpired));
        let requests = server.join().unwrap_or_else(|_| panic!("server thread panicked"));
        assert_eq!(requests.len(), 1);
        Ok(())
    }

    #[test]
    fn refused_connection_is_a_connection_failure() -> Result<(), RemoteError> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .map_err(|err| RemoteError::InvalidConfig(err.to_string()))?;
        let address = listener.local_addr().map_err(|err| RemoteError::InvalidConfig(err.to_string()))?;
        drop(listener);

        let probe = probe_for(format!("http://{address}"))?;
        let outcome = probe.probe(&partition(), 1, 2025);
        assert_eq!(failure_kind(&outcome), Some(TransportErrorKind::Connection));
        Ok(())
    }

    #[test]
    fn silent_server_is_a_timeout() -> Result<(), RemoteError> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .map_err(|err| RemoteError::InvalidConfig(err.to_string()))?;
        let address = listener.local_addr().map_err(|err| RemoteError::InvalidConfig(err.to_string()))?;
        thread::spawn(move || {
            if let Ok((stream, _)) = listener.accept() {
                thread::sleep(std::time::Duration::from_secs(3));
                drop(stream);
            }
        });

        let config = RemoteConfig {
            base_url: format!("http://{address}"),
            timeout_secs: 1,
            ..RemoteConfig::default()
        };
        let probe = HttpProbe::new(config, &SessionCredential::Inline("token-123".to_string()))?;
        let outcome = probe.probe(&partition(), 1, 2025);
        assert_eq!(failure_kind(&outcome), Some(TransportErrorKind::Timeout));
        Ok(())
    }

    #[test]
    fn empty_base_url_is_rejected() {
        let config = RemoteConfig { base_url: " ".to_string(), ..RemoteConfig::default() };
        let result = HttpProbe::new(config, &SessionCredential::Inline("t".to_string()));
        assert!(matches!(result, Err(RemoteError::InvalidConfig(_))));
    }
}
