//! Kernel build plan execution.
//!
//! Runs an ordered list of shell commands synchronously; the first non-zero
//! exit aborts the rest of the plan. Build breaks always classify as SKIP:
//! a toolchain problem must not blame the revision under bisection.
//!
//! A successful plan always appends two tail steps before anything boots:
//! a per-user LOCALVERSION string (several people share the module install
//! tree, so artifacts must not collide) and the parallel ccache compile.
//! A modules_install step follows when an install path is configured.

use std::process::Command;

use serde::Deserialize;

use crate::error::TargetError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BuildPlan {
    /// Configuration commands to run before the compile (defconfig,
    /// scripts/config tweaks, ...).
    pub commands: Vec<String>,
    /// Toolchain prefix; falls back to $CROSS_COMPILE when unset.
    pub cross_compile: Option<String>,
    /// Parallelism for the compile step.
    pub jobs: u32,
    /// When set, `make modules_install` into this path after the compile.
    pub modules_install_path: Option<String>,
}

impl Default for BuildPlan {
    fn default() -> Self {
        Self {
            commands: Vec::new(),
            cross_compile: None,
            jobs: 24,
            modules_install_path: None,
        }
    }
}

impl BuildPlan {
    /// The configured commands plus the mandatory tail steps.
    pub fn full_plan(&self) -> Vec<String> {
        let mut plan = self.commands.clone();

        let user = std::env::var("USER").unwrap_or_else(|_| "kdbtest".to_string());
        plan.push(format!("scripts/config --set-str LOCALVERSION -{}-", user));

        let cross = self
            .cross_compile
            .clone()
            .or_else(|| std::env::var("CROSS_COMPILE").ok())
            .unwrap_or_default();
        plan.push(format!("make CC=\"ccache {}gcc\" -j {}", cross, self.jobs));

        if let Some(path) = &self.modules_install_path {
            plan.push(format!("make INSTALL_MOD_PATH={} modules_install", path));
        }
        plan
    }

    /// Run the whole plan, short-circuiting on the first failure.
    pub fn run(&self) -> Result<(), TargetError> {
        run_commands(&self.full_plan())
    }
}

/// Run shell commands in order; the first non-zero exit aborts the rest.
/// Each command is echoed before it runs so transcripts show what executed.
pub fn run_commands(commands: &[String]) -> Result<(), TargetError> {
    for command in commands {
        println!("{}", command);
        let status = Command::new("sh")
            .arg("-c")
            .arg(command)
            .status()
            .map_err(|_| TargetError::Build {
                command: command.clone(),
                code: -1,
            })?;
        if !status.success() {
            return Err(TargetError::Build {
                command: command.clone(),
                code: status.code().unwrap_or(-1),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_steps_always_present() {
        let plan = BuildPlan::default().full_plan();
        assert_eq!(plan.len(), 2);
        assert!(plan[0].starts_with("scripts/config --set-str LOCALVERSION -"));
        assert!(plan[1].contains("make CC=\"ccache "));
        assert!(plan[1].contains("-j 24"));
    }

    #[test]
    fn test_modules_install_is_optional() {
        let mut plan = BuildPlan::default();
        assert!(!plan.full_plan().iter().any(|c| c.contains("modules_install")));

        plan.modules_install_path = Some("/opt/rootfs".to_string());
        let last = plan.full_plan().pop().unwrap();
        assert_eq!(last, "make INSTALL_MOD_PATH=/opt/rootfs modules_install");
    }

    #[test]
    fn test_config_commands_run_before_tail() {
        let plan = BuildPlan {
            commands: vec!["make defconfig".to_string()],
            ..BuildPlan::default()
        };
        let full = plan.full_plan();
        assert_eq!(full[0], "make defconfig");
        assert!(full[1].contains("LOCALVERSION"));
    }

    #[test]
    fn test_all_zero_exits_succeed() {
        let cmds = vec!["true".to_string(), "true".to_string()];
        run_commands(&cmds).unwrap();
    }

    #[test]
    fn test_first_failure_short_circuits() {
        let marker = std::env::temp_dir().join(format!(
            "kdbtest-shortcircuit-{}",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&marker);

        let cmds = vec![
            "true".to_string(),
            "false".to_string(),
            format!("touch {}", marker.display()),
        ];
        let err = run_commands(&cmds).unwrap_err();
        match err {
            TargetError::Build { command, code } => {
                assert_eq!(command, "false");
                assert_eq!(code, 1);
            }
            other => panic!("expected Build, got {:?}", other),
        }
        assert!(!marker.exists(), "commands after the failure must not run");
    }
}
