//! Boot milestone sequencing.
//!
//! A boot attempt is judged by an ordered chain of console milestones that
//! must all appear, in order, on one session: a board-specific bootloader
//! prefix, a fixed kernel-stage suffix, and optionally an init-system
//! suffix. The exact strings are a compatibility surface with the target's
//! console output; change them only when the kernel changes them.
//!
//! The sequencer never retries an individual milestone. Recovery, if any,
//! happens at the whole-attempt level in the retry controller.

use serde::Deserialize;

use crate::error::TargetError;
use crate::session::{Alt, Session};

/// Fixed kernel-stage milestones, from first kernel output to the point
/// where init takes over.
pub const KERNEL_MILESTONES: &[&str] = &[
    "Booting Linux",
    "Kernel command line.*",
    r"Calibrating delay loop\.\.\.",
    "NET: Registered protocol family 2",
    r"io scheduler [^ ]* registered .default.",
    "Freeing unused kernel memory",
];

/// Evidence that buildroot init reached the console.
pub const BUILDROOT_MILESTONES: &[&str] = &["Starting logging", "OK", "Welcome to Buildroot"];

/// Evidence that systemd reached the console.
pub const SYSTEMD_MILESTONES: &[&str] = &[r"Listening on Syslog Socket\."];

/// Which init system's readiness lines extend the kernel chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BootFlavor {
    /// Kernel milestones only, no init-system suffix.
    Kernel,
    Buildroot,
    Systemd,
}

/// One stage of the milestone chain. The stage name goes into the failure
/// message when any of its patterns is missed.
#[derive(Debug, Clone)]
pub struct Stage {
    pub name: &'static str,
    pub patterns: Vec<String>,
}

/// Compose the full milestone chain for a flavor. The bootloader prefix is
/// board-specific and folds into the kernel stage, matching how a missed
/// bootloader banner is reported.
pub fn stages_for(flavor: BootFlavor, bootloader: &[String]) -> Vec<Stage> {
    let mut kernel: Vec<String> = bootloader.to_vec();
    kernel.extend(KERNEL_MILESTONES.iter().map(|p| p.to_string()));

    let mut stages = vec![Stage {
        name: "kernel",
        patterns: kernel,
    }];

    match flavor {
        BootFlavor::Kernel => {}
        BootFlavor::Buildroot => stages.push(Stage {
            name: "buildroot",
            patterns: BUILDROOT_MILESTONES.iter().map(|p| p.to_string()).collect(),
        }),
        BootFlavor::Systemd => stages.push(Stage {
            name: "systemd",
            patterns: SYSTEMD_MILESTONES.iter().map(|p| p.to_string()).collect(),
        }),
    }
    stages
}

/// Run the milestone chain against one session, strictly in order. Any
/// single unmatched pattern aborts the whole chain with a boot-activity
/// failure naming the stage that broke.
pub fn expect_boot(session: &mut Session, stages: &[Stage]) -> Result<(), TargetError> {
    for stage in stages {
        for pattern in &stage.patterns {
            session.expect(pattern).map_err(|e| match e {
                TargetError::ExpectTimeout { .. } | TargetError::Eof { .. } => {
                    TargetError::BootActivity {
                        stage: stage.name,
                        source: Box::new(e),
                    }
                }
                other => other,
            })?;
        }
    }
    Ok(())
}

/// Which login banner showed up after boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginPrompt {
    Debian,
    Buildroot,
}

/// Wait for a login prompt on the console.
pub fn expect_login_prompt(session: &mut Session) -> Result<LoginPrompt, TargetError> {
    session.expect_any(&[
        Alt::new(LoginPrompt::Debian, "debian-[^ ]* login:"),
        Alt::new(LoginPrompt::Buildroot, "buildroot login:"),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::TransportSpec;
    use std::time::Duration;

    const GOOD_SYSTEMD_BOOT: &str = "U-Boot 2023.07\\n\
        Booting Linux on physical CPU 0x0\\n\
        Kernel command line: console=ttyS0 root=/dev/vda\\n\
        Calibrating delay loop... 4800.00 BogoMIPS\\n\
        NET: Registered protocol family 2\\n\
        io scheduler mq-deadline registered (default)\\n\
        Freeing unused kernel memory: 2048K\\n\
        [  OK  ] Listening on Syslog Socket.\\n";

    fn console_with(output: &str) -> Session {
        let spec = TransportSpec::Launcher {
            command: format!("printf '{}'", output),
        };
        let mut s = Session::connect(&spec).unwrap();
        s.set_timeout(Duration::from_secs(2));
        s
    }

    #[test]
    fn test_flavors_compose() {
        let bootloader = vec!["U-Boot".to_string()];
        let kernel = stages_for(BootFlavor::Kernel, &bootloader);
        assert_eq!(kernel.len(), 1);
        assert_eq!(kernel[0].name, "kernel");
        assert_eq!(kernel[0].patterns[0], "U-Boot");

        let systemd = stages_for(BootFlavor::Systemd, &bootloader);
        assert_eq!(systemd.len(), 2);
        assert_eq!(systemd[1].name, "systemd");

        let buildroot = stages_for(BootFlavor::Buildroot, &bootloader);
        assert_eq!(buildroot[1].name, "buildroot");
        assert_eq!(buildroot[1].patterns.len(), 3);
    }

    #[test]
    fn test_good_systemd_boot() {
        let mut s = console_with(GOOD_SYSTEMD_BOOT);
        let stages = stages_for(BootFlavor::Systemd, &["U-Boot".to_string()]);
        expect_boot(&mut s, &stages).unwrap();
    }

    #[test]
    fn test_missing_systemd_milestone_names_systemd() {
        // Same boot but the syslog socket line never appears.
        let truncated = GOOD_SYSTEMD_BOOT.replace("[  OK  ] Listening on Syslog Socket.\\n", "");
        let mut s = console_with(&truncated);
        let stages = stages_for(BootFlavor::Systemd, &["U-Boot".to_string()]);
        let err = expect_boot(&mut s, &stages).unwrap_err();
        assert!(matches!(err, TargetError::BootActivity { stage: "systemd", .. }));
    }

    #[test]
    fn test_missing_kernel_milestone_names_kernel() {
        let broken = GOOD_SYSTEMD_BOOT.replace("NET: Registered protocol family 2\\n", "");
        let mut s = console_with(&broken);
        let stages = stages_for(BootFlavor::Systemd, &[]);
        let err = expect_boot(&mut s, &stages).unwrap_err();
        match err {
            TargetError::BootActivity { stage, source } => {
                assert_eq!(stage, "kernel");
                // The console tail survives on the source for post-mortem:
                // the lines that arrived while waiting are still there.
                assert!(source.to_string().contains("io scheduler"));
            }
            other => panic!("expected BootActivity, got {:?}", other),
        }
    }

    #[test]
    fn test_reordered_milestones_fail() {
        // Milestones are an ordered expectation: the net line arriving
        // after the memory-free line cannot satisfy the chain, because the
        // memory-free wait consumed it.
        let reordered = GOOD_SYSTEMD_BOOT
            .replace("NET: Registered protocol family 2\\n", "")
            .replace(
                "Freeing unused kernel memory: 2048K\\n",
                "Freeing unused kernel memory: 2048K\\nNET: Registered protocol family 2\\n",
            );
        let mut s = console_with(&reordered);
        let stages = stages_for(BootFlavor::Kernel, &[]);
        assert!(expect_boot(&mut s, &stages).is_err());
    }

    #[test]
    fn test_login_prompt_alternatives() {
        let mut s = console_with("buildroot login:\\n");
        assert_eq!(expect_login_prompt(&mut s).unwrap(), LoginPrompt::Buildroot);
    }
}
