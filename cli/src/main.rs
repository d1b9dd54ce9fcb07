mod output;

use clap::Parser;
use clap::error::ErrorKind;
use output::{EventPrinter, OutputFormat};
use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;
use std::time::Duration;
use stepwatch_monitor::{MonitorConfig, MonitorError, RunState, shutdown};
use stepwatch_vmi::{Backend, LibVmi, Target};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "stepwatch", version)]
#[command(about = "Single-step every VCPU of a running VM and print each step")]
struct Cli {
    /// Name of the VM to attach to (a numeric domain id with --domid)
    vm_name: String,

    /// KVMi socket path passed to the introspection backend
    socket_path: Option<String>,

    /// Interpret VM_NAME as a numeric domain id
    #[arg(long)]
    domid: bool,

    /// Milliseconds to wait for events on each listen call
    #[arg(long, default_value_t = 500, value_parser = clap::value_parser!(u64).range(1..))]
    timeout_ms: u64,

    /// Output format for single-step events
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

impl Cli {
    fn monitor_config(&self) -> Result<MonitorConfig, MonitorError> {
        let target = if self.domid {
            let id = self.vm_name.parse::<u64>().map_err(|_| {
                MonitorError::Usage(format!("invalid domain id '{}'", self.vm_name))
            })?;
            Target::Id(id)
        } else {
            Target::Name(self.vm_name.clone())
        };

        Ok(MonitorConfig {
            target,
            socket_path: self.socket_path.clone(),
            listen_timeout: Duration::from_millis(self.timeout_ms),
        })
    }
}

fn usage_error(e: &clap::Error) -> MonitorError {
    let detail = match e.kind() {
        ErrorKind::MissingRequiredArgument => "missing VM name".to_string(),
        _ => e
            .to_string()
            .lines()
            .next()
            .unwrap_or_default()
            .trim_start_matches("error: ")
            .to_string(),
    };
    MonitorError::Usage(detail)
}

fn report(e: &MonitorError) -> u8 {
    eprintln!("{}", e.diagnostic());
    1
}

/// Parse `args`, then attach a backend from `make_backend` and monitor until
/// `run_state` asks for a stop. Returns the process exit status.
fn run_with<I, T, B, F, W>(args: I, make_backend: F, run_state: &RunState, out: W) -> u8
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
    B: Backend,
    F: FnOnce() -> B,
    W: Write + 'static,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            return 0;
        }
        Err(e) => return report(&usage_error(&e)),
    };

    let config = match cli.monitor_config() {
        Ok(config) => config,
        Err(e) => return report(&e),
    };

    if let Err(e) = shutdown::install() {
        return report(&MonitorError::from(e));
    }

    let mut printer = EventPrinter::new(cli.format, out);
    let result = stepwatch_monitor::run(make_backend(), &config, run_state, move |event| {
        if let Err(e) = printer.print(event) {
            tracing::warn!(error = %e, "Failed to write event");
        }
    });

    match result {
        Ok(summary) => {
            tracing::info!(
                delivered = summary.delivered,
                signal = ?summary.signal,
                "Finished monitoring"
            );
            0
        }
        Err(e) => report(&e),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let code = run_with(
        std::env::args_os(),
        LibVmi::new,
        RunState::global(),
        std::io::stdout(),
    );
    ExitCode::from(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use std::sync::Arc;
    use stepwatch_vmi::testing::{Call, ScriptedBackend};
    use stepwatch_vmi::{AccessMode, EVENTS_VERSION, SingleStepEvent};

    #[derive(Clone, Default)]
    struct SharedBuf(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8(self.0.borrow().clone()).unwrap()
        }
    }

    #[test]
    fn test_scenario_two_vcpus_until_interrupt() {
        let state = Arc::new(RunState::new());
        let flag = state.clone();
        let backend = ScriptedBackend::new(2)
            .with_events(vec![
                SingleStepEvent {
                    vcpu: 0,
                    gla: 0xffff_f800_0000_1000,
                    gfn: 0x1,
                },
                SingleStepEvent {
                    vcpu: 1,
                    gla: 0xffff_f800_0000_2000,
                    gfn: 0x2,
                },
            ])
            .on_listen(move |n| {
                if n == 2 {
                    flag.request_stop(libc::SIGINT);
                }
            });
        let journal = backend.journal();
        let out = SharedBuf::default();

        let code = run_with(["prog", "myvm"], || backend, &state, out.clone());

        assert_eq!(code, 0);
        assert_eq!(
            journal.count(&Call::RegisterSingleStep {
                version: EVENTS_VERSION,
                vcpus: 0b11,
            }),
            1
        );
        assert_eq!(
            out.contents(),
            "Single-step event: VCPU:0  GFN 1 GLA fffff80000001000\n\
             Single-step event: VCPU:1  GFN 2 GLA fffff80000002000\n"
        );
        assert_eq!(
            journal.after_last_listen(),
            vec![Call::ClearSingleStep { vcpus: 0b11 }, Call::Destroy]
        );
    }

    #[test]
    fn test_scenario_missing_vm_name() {
        let state = RunState::new();
        let built = Cell::new(false);

        let code = run_with(
            ["prog"],
            || {
                built.set(true);
                ScriptedBackend::new(1)
            },
            &state,
            SharedBuf::default(),
        );

        assert_eq!(code, 1);
        assert!(!built.get());
    }

    #[test]
    fn test_scenario_attach_failure() {
        let state = RunState::new();
        let backend = ScriptedBackend::new(2).fail_attach();
        let journal = backend.journal();

        let code = run_with(
            ["prog", "myvm", "/tmp/sock"],
            || backend,
            &state,
            SharedBuf::default(),
        );

        assert_eq!(code, 1);
        assert_eq!(
            journal.calls(),
            vec![
                Call::Probe {
                    target: Target::Name("myvm".to_string()),
                    socket_path: Some("/tmp/sock".to_string()),
                },
                Call::Attach {
                    mode: AccessMode::Kvm,
                    socket_path: Some("/tmp/sock".to_string()),
                },
                Call::Destroy,
            ]
        );
    }

    #[test]
    fn test_domid_target_and_timeout() {
        let state = Arc::new(RunState::new());
        state.request_stop(libc::SIGTERM);
        let backend = ScriptedBackend::new(1);
        let journal = backend.journal();

        let code = run_with(
            ["prog", "--domid", "--timeout-ms", "50", "7"],
            || backend,
            &state,
            SharedBuf::default(),
        );

        assert_eq!(code, 0);
        assert_eq!(
            journal.calls()[0],
            Call::Probe {
                target: Target::Id(7),
                socket_path: None,
            }
        );
        assert_eq!(journal.listens(), 0);
    }

    #[test]
    fn test_usage_errors_make_no_backend_calls() {
        let state = RunState::new();
        for args in [
            vec!["prog", "--domid", "not-a-number"],
            vec!["prog", "--timeout-ms", "0", "myvm"],
            vec!["prog", "--format", "xml", "myvm"],
        ] {
            let built = Cell::new(false);
            let code = run_with(
                args,
                || {
                    built.set(true);
                    ScriptedBackend::new(1)
                },
                &state,
                SharedBuf::default(),
            );
            assert_eq!(code, 1);
            assert!(!built.get());
        }
    }

    #[test]
    fn test_json_output() {
        let state = Arc::new(RunState::new());
        let flag = state.clone();
        let backend = ScriptedBackend::new(1)
            .with_events(vec![SingleStepEvent {
                vcpu: 0,
                gla: 0x401000,
                gfn: 0x401,
            }])
            .on_listen(move |_| flag.request_stop(libc::SIGHUP));
        let out = SharedBuf::default();

        let code = run_with(
            ["prog", "--format", "json", "myvm"],
            || backend,
            &state,
            out.clone(),
        );

        assert_eq!(code, 0);
        assert_eq!(out.contents(), "{\"vcpu\":0,\"gla\":4198400,\"gfn\":1025}\n");
    }
}
