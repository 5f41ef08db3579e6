use std::{env, net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use crate::sandbox::Language;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub log_level: String,
    pub catalog_path: Option<PathBuf>,
    pub submission_log_path: Option<PathBuf>,
    pub judge: JudgeConfig,
    pub contest: ContestConfig,
    pub duel: DuelConfig,
}

#[derive(Debug, Clone)]
pub struct JudgeConfig {
    pub enabled: bool,
    pub sandbox_backend: SandboxBackendKind,
    pub work_root: PathBuf,
    pub default_timeout: Duration,
    pub submission_timeout: Duration,
    pub build_timeout_multiplier: u32,
    pub build_timeout_floor: Duration,
    pub max_output_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct ContestConfig {
    pub max_tasks: usize,
    pub default_duration_min: i64,
    pub reaper_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct DuelConfig {
    pub bot_tick: Duration,
    pub bot_max_ticks: u32,
    pub bot_max_increment: i64,
    pub default_problem_id: String,
    pub default_language: Language,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            bind_addr: env_parse("BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080))),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            catalog_path: env::var("CATALOG_PATH").ok().map(PathBuf::from),
            submission_log_path: env::var("SUBMISSION_LOG_PATH").ok().map(PathBuf::from),
            judge: JudgeConfig {
                enabled: env_parse("JUDGE_ENABLED", true),
                sandbox_backend: env_parse("SANDBOX_BACKEND", SandboxBackendKind::Process),
                work_root: env::var("SANDBOX_WORK_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| env::temp_dir()),
                default_timeout: Duration::from_millis(env_parse("DEFAULT_TIMEOUT_MS", 2_000)),
                submission_timeout: Duration::from_millis(env_parse(
                    "SUBMISSION_TIMEOUT_MS",
                    5_000,
                )),
                build_timeout_multiplier: env_parse("BUILD_TIMEOUT_MULTIPLIER", 5u32),
                build_timeout_floor: Duration::from_millis(env_parse(
                    "BUILD_TIMEOUT_FLOOR_MS",
                    10_000,
                )),
                max_output_bytes: env_parse("MAX_OUTPUT_BYTES", 64 * 1024usize),
            },
            contest: ContestConfig {
                max_tasks: env_parse("CONTEST_MAX_TASKS", 20usize).max(1),
                default_duration_min: env_parse("CONTEST_DEFAULT_DURATION_MIN", 30i64),
                reaper_enabled: env_parse("CONTEST_REAPER_ENABLED", true),
            },
            duel: DuelConfig {
                bot_tick: Duration::from_millis(env_parse("BOT_TICK_MS", 2_000)),
                bot_max_ticks: env_parse("BOT_MAX_TICKS", 20u32),
                bot_max_increment: env_parse("BOT_MAX_INCREMENT", 10i64).max(0),
                default_problem_id: env::var("DUEL_DEFAULT_PROBLEM_ID")
                    .unwrap_or_else(|_| "easy-3-single-number".to_string()),
                default_language: env_parse("DUEL_DEFAULT_LANGUAGE", Language::Go),
            },
        }
    }
}

impl JudgeConfig {
    /// Compile budget derived from the per-testcase timeout.
    pub fn build_timeout(&self, run_timeout: Duration) -> Duration {
        (run_timeout * self.build_timeout_multiplier).max(self.build_timeout_floor)
    }
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sandbox_backend: SandboxBackendKind::Process,
            work_root: env::temp_dir(),
            default_timeout: Duration::from_secs(2),
            submission_timeout: Duration::from_secs(5),
            build_timeout_multiplier: 5,
            build_timeout_floor: Duration::from_secs(10),
            max_output_bytes: 64 * 1024,
        }
    }
}

impl Default for ContestConfig {
    fn default() -> Self {
        Self {
            max_tasks: 20,
            default_duration_min: 30,
            reaper_enabled: true,
        }
    }
}

impl Default for DuelConfig {
    fn default() -> Self {
        Self {
            bot_tick: Duration::from_secs(2),
            bot_max_ticks: 20,
            bot_max_increment: 10,
            default_problem_id: "easy-3-single-number".to_string(),
            default_language: Language::Go,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SandboxBackendKind {
    #[default]
    Process,
}

impl FromStr for SandboxBackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "process" => Ok(Self::Process),
            _ => Err(format!("unsupported sandbox backend: {s}")),
        }
    }
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}
