//! Probe orchestration: worker pools fanning probes out over smuggled and
//! control transports, results fanning back in over channels.

use std::thread;

use crossbeam_channel::{bounded, never, select, Receiver, Sender};

use crate::control::ControlClient;
use crate::diff::{headers_value, ResponseDiff};
use crate::error::ProbeError;
use crate::message::{Method, Request, Response};
use crate::smuggle::{ConnConfig, SmuggledConn, UpgradeOptions};
use crate::target::Target;

pub const DEFAULT_CONN_PER_HOST: usize = 5;
pub const DEFAULT_PARALLEL_HOSTS: usize = 10;

/// Per-batch request shaping.
#[derive(Debug, Clone)]
pub struct ProbeOptions {
    pub method: Method,
    /// Extra headers for every request. A `Host` entry becomes the
    /// authority override instead of a literal header.
    pub headers: Vec<(String, String)>,
    /// Dump raw responses instead of structured log records.
    pub pretty: bool,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        ProbeOptions {
            method: Method::Get,
            headers: Vec::new(),
            pretty: false,
        }
    }
}

/// Outcome of a single probe on either transport.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub target: String,
    pub response: Option<Response>,
    pub error: Option<String>,
}

impl ProbeResult {
    pub fn ok(target: impl Into<String>, response: Response) -> Self {
        ProbeResult {
            target: target.into(),
            response: Some(response),
            error: None,
        }
    }

    pub fn err(target: impl Into<String>, err: &ProbeError) -> Self {
        ProbeResult {
            target: target.into(),
            response: None,
            error: Some(err.to_string()),
        }
    }

    /// Log this result on its own, outside of diffing.
    pub fn log(&self, source: &str, pretty: bool) {
        if let Some(err) = &self.error {
            if pretty {
                println!("[{} error on {}]\n{err}\n", source, self.target);
            } else {
                tracing::error!(target = %self.target, source, error = %err, "failed");
            }
            return;
        }
        let Some(response) = &self.response else {
            return;
        };

        if pretty {
            println!("[{} response from {}]", source, self.target);
            print!("{}", response.dump_head("HTTP/2"));
            if tracing::enabled!(tracing::Level::DEBUG) {
                println!("{}", String::from_utf8_lossy(&response.body));
            } else {
                println!("[Response body: {} bytes]", response.body.len());
            }
            println!();
        } else if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::info!(
                target = %self.target,
                source,
                status = response.status,
                headers = %headers_value(&response.headers),
                body = %String::from_utf8_lossy(&response.body),
                "success"
            );
        } else {
            tracing::info!(
                target = %self.target,
                source,
                status = response.status,
                headers = %headers_value(&response.headers),
                body = response.body.len(),
                "success"
            );
        }
    }
}

/// The probe orchestrator. Holds concurrency bounds and the connection and
/// upgrade configuration every worker uses.
pub struct ProbeClient {
    pub max_conn_per_host: usize,
    pub max_parallel_hosts: usize,
    pub conn: ConnConfig,
    pub upgrade: UpgradeOptions,
}

impl Default for ProbeClient {
    fn default() -> Self {
        ProbeClient {
            max_conn_per_host: 0,
            max_parallel_hosts: 0,
            conn: ConnConfig {
                max_retries: 3,
                ..ConnConfig::default()
            },
            upgrade: UpgradeOptions::default(),
        }
    }
}

impl ProbeClient {
    pub fn new() -> Self {
        ProbeClient::default()
    }

    fn build_request(&self, target: &str, opts: &ProbeOptions) -> Result<Request, ProbeError> {
        let parsed = Target::parse(target)?;
        let mut request = Request::new(opts.method, parsed);
        for (name, value) in &opts.headers {
            if name.eq_ignore_ascii_case("host") {
                request.host = Some(value.clone());
            } else {
                request.headers.insert(name.clone(), value.clone());
            }
        }
        Ok(request)
    }

    /// One probe per target URL, each on its own fresh connection.
    /// Worker count bounded by `max_parallel_hosts`.
    pub fn check_hosts(&self, targets: &[String], opts: &ProbeOptions) {
        let workers = if self.max_parallel_hosts == 0 {
            DEFAULT_PARALLEL_HOSTS
        } else {
            self.max_parallel_hosts
        };

        let (in_tx, in_rx) = bounded::<String>(workers);
        let (out_tx, out_rx) = bounded::<ProbeResult>(workers);

        thread::scope(|scope| {
            for _ in 0..workers {
                let in_rx = in_rx.clone();
                let out_tx = out_tx.clone();
                scope.spawn(move || {
                    for target in in_rx.iter() {
                        let result = self.probe_fresh_conn(&target, opts);
                        if out_tx.send(result).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(in_rx);
            drop(out_tx);

            scope.spawn(move || {
                for target in targets {
                    tracing::trace!(%target, "scheduling");
                    if in_tx.send(target.clone()).is_err() {
                        break;
                    }
                }
            });

            for result in out_rx.iter() {
                result.log("h2c", opts.pretty);
            }
        });
    }

    fn probe_fresh_conn(&self, target: &str, opts: &ProbeOptions) -> ProbeResult {
        let request = match self.build_request(target, opts) {
            Ok(request) => request,
            Err(err) => return ProbeResult::err(target, &err),
        };
        match SmuggledConn::connect(&request, &self.upgrade, &self.conn) {
            Ok(mut conn) => {
                let result = match conn.upgrade_response() {
                    Ok(response) => ProbeResult::ok(target, response),
                    Err(err) => ProbeResult::err(target, &err),
                };
                conn.close();
                result
            }
            Err(err) => ProbeResult::err(target, &err),
        }
    }

    /// N path probes against one base host, workers each owning one
    /// upgraded connection and draining a shared queue.
    pub fn paths_on_host(
        &self,
        base: &str,
        targets: &[String],
        opts: &ProbeOptions,
    ) -> Result<(), ProbeError> {
        // Validate the base before any worker dials it.
        self.build_request(base, opts)?;

        let workers = self.path_workers(targets.len());
        let (in_tx, in_rx) = bounded::<String>(workers.max(1));
        let (out_tx, out_rx) = bounded::<ProbeResult>(workers.max(1));

        thread::scope(|scope| {
            for _ in 0..workers {
                let in_rx = in_rx.clone();
                let out_tx = out_tx.clone();
                scope.spawn(move || self.path_worker(base, opts, in_rx, out_tx));
            }
            drop(in_rx);
            drop(out_tx);

            scope.spawn(move || {
                for target in targets {
                    tracing::trace!(%target, "scheduling");
                    if in_tx.send(target.clone()).is_err() {
                        break;
                    }
                }
            });

            for result in out_rx.iter() {
                result.log("h2c", opts.pretty);
            }
        });
        Ok(())
    }

    /// Same fan-out as [`paths_on_host`], but each path is also fetched
    /// over the control transport and the two results are diffed.
    ///
    /// [`paths_on_host`]: ProbeClient::paths_on_host
    pub fn paths_diff_on_host(
        &self,
        base: &str,
        targets: &[String],
        opts: &ProbeOptions,
    ) -> Result<(), ProbeError> {
        let base_request = self.build_request(base, opts)?;
        let base_target = base_request.target.clone();

        let workers = self.path_workers(targets.len());
        let control = ControlClient::new(self.conn.clone());

        let (smuggled_tx, smuggled_in) = bounded::<String>(workers.max(1));
        let (control_tx, control_in) = bounded::<String>(workers.max(1));
        let (smuggled_out_tx, smuggled_out) = bounded::<ProbeResult>(workers.max(1));
        let (control_out_tx, control_out) = bounded::<ProbeResult>(workers.max(1));

        thread::scope(|scope| {
            for _ in 0..workers {
                let in_rx = smuggled_in.clone();
                let out_tx = smuggled_out_tx.clone();
                scope.spawn(move || self.path_worker(base, opts, in_rx, out_tx));

                let control = &control;
                let base_target = &base_target;
                let in_rx = control_in.clone();
                let out_tx = control_out_tx.clone();
                scope.spawn(move || {
                    for target in in_rx.iter() {
                        let result = match self.build_request(&target, opts) {
                            Ok(mut request) => {
                                // The control connection goes to the base
                                // host, whatever host the probe URL names.
                                request.target = request.target.redirected_to(base_target);
                                match control.fetch(&request) {
                                    Ok(response) => ProbeResult::ok(&*target, response),
                                    Err(err) => ProbeResult::err(&*target, &err),
                                }
                            }
                            Err(err) => ProbeResult::err(&*target, &err),
                        };
                        if out_tx.send(result).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(smuggled_in);
            drop(control_in);
            drop(smuggled_out_tx);
            drop(control_out_tx);

            scope.spawn(move || {
                for target in targets {
                    tracing::trace!(%target, "scheduling");
                    if smuggled_tx.send(target.clone()).is_err() {
                        break;
                    }
                    if control_tx.send(target.clone()).is_err() {
                        break;
                    }
                }
            });

            self.drain_diff(smuggled_out, control_out, opts.pretty);
        });
        Ok(())
    }

    fn drain_diff(
        &self,
        smuggled_out: Receiver<ProbeResult>,
        control_out: Receiver<ProbeResult>,
        pretty: bool,
    ) {
        let mut differ = ResponseDiff::new(true);
        differ.pretty = pretty;

        let mut smuggled_rx = smuggled_out;
        let mut control_rx = control_out;
        let mut smuggled_open = true;
        let mut control_open = true;

        while smuggled_open || control_open {
            select! {
                recv(smuggled_rx) -> msg => match msg {
                    Ok(result) => differ.record_smuggled(result),
                    Err(_) => {
                        smuggled_open = false;
                        smuggled_rx = never();
                    }
                },
                recv(control_rx) -> msg => match msg {
                    Ok(result) => differ.record_control(result),
                    Err(_) => {
                        control_open = false;
                        control_rx = never();
                    }
                },
            }
        }
    }

    /// Worker loop for the smuggled side: upgrade once via the base
    /// request, then drain the queue over the same connection.
    fn path_worker(
        &self,
        base: &str,
        opts: &ProbeOptions,
        in_rx: Receiver<String>,
        out_tx: Sender<ProbeResult>,
    ) {
        let mut conn = match self
            .build_request(base, opts)
            .and_then(|request| SmuggledConn::connect(&request, &self.upgrade, &self.conn))
        {
            Ok(mut conn) => {
                // The upgrade response is the base request's; expected to
                // work, so it is logged rather than reported.
                match conn.upgrade_response() {
                    Ok(response) => {
                        tracing::trace!(base, status = response.status, "base request done")
                    }
                    Err(err) => tracing::trace!(base, error = %err, "base request failed"),
                }
                Some(conn)
            }
            Err(err) => {
                tracing::trace!(base, error = %err, "failed to connect");
                // Every queued target fails with the connect error.
                let message = err.to_string();
                for target in in_rx.iter() {
                    let result = ProbeResult {
                        target,
                        response: None,
                        error: Some(message.clone()),
                    };
                    if out_tx.send(result).is_err() {
                        return;
                    }
                }
                return;
            }
        };

        for target in in_rx.iter() {
            tracing::trace!(%target, "requesting");
            let result = match self.build_request(&target, opts) {
                Ok(request) => match conn.as_mut().expect("connection present").round_trip(&request) {
                    Ok(response) => ProbeResult::ok(&*target, response),
                    Err(err) => ProbeResult::err(&*target, &err),
                },
                Err(err) => ProbeResult::err(&*target, &err),
            };
            if out_tx.send(result).is_err() {
                break;
            }
        }

        if let Some(conn) = conn.take() {
            conn.close();
        }
    }

    fn path_workers(&self, targets: usize) -> usize {
        let configured = if self.max_conn_per_host == 0 {
            DEFAULT_CONN_PER_HOST
        } else {
            self.max_conn_per_host
        };
        configured.min(targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_count_is_bounded_by_targets() {
        let mut client = ProbeClient::new();
        assert_eq!(client.path_workers(2), 2);
        assert_eq!(client.path_workers(100), DEFAULT_CONN_PER_HOST);
        client.max_conn_per_host = 3;
        assert_eq!(client.path_workers(100), 3);
        assert_eq!(client.path_workers(0), 0);
    }

    #[test]
    fn build_request_maps_host_header() {
        let client = ProbeClient::new();
        let opts = ProbeOptions {
            headers: vec![
                ("Host".to_string(), "internal.example".to_string()),
                ("X-Probe".to_string(), "1".to_string()),
            ],
            ..ProbeOptions::default()
        };
        let request = client
            .build_request("http://front.example/admin", &opts)
            .unwrap();
        assert_eq!(request.host.as_deref(), Some("internal.example"));
        assert!(!request.headers.contains("host"));
        assert_eq!(request.headers.get("x-probe"), Some("1"));
    }

    #[test]
    fn bad_base_is_a_config_error() {
        let client = ProbeClient::new();
        let err = client
            .paths_on_host("::not a url::", &[], &ProbeOptions::default())
            .unwrap_err();
        assert!(matches!(err, ProbeError::Config { .. }));
    }
}
