//! Kernel confinement for the process executor.
//!
//! Everything is compiled in the parent. The child only applies what was
//! built, between `fork` and `exec`, in the order rlimits, capability drop,
//! Landlock, seccomp. Seccomp goes last because its allowlist would kill the
//! `prctl` and Landlock calls before it.
//!
//! Hosts that cannot apply a control report it through [`supports`], and the
//! enforcer refuses to run.

#![allow(unsafe_code)]

use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Command;

use crate::isolation::{
    EnforcedControl, CAPABILITY_CONTROL, NETWORK_CONTROL, RESOURCE_CONTROL, SYSCALL_CONTROL,
    WRITE_PATH_CONTROL,
};
use crate::manifest::SandboxManifest;

const MIB: u64 = 1024 * 1024;

/// Whether this host can apply `control` the way its mechanism names.
pub(crate) fn supports(control: &EnforcedControl) -> bool {
    match (control.control.as_str(), control.mechanism.as_str()) {
        (SYSCALL_CONTROL, "seccomp") | (NETWORK_CONTROL, "seccomp_no_socket") => {
            imp::syscall_filter(&control.scope).is_ok()
        }
        (CAPABILITY_CONTROL, "process_capability_drop") => {
            imp::capability_drops(&control.scope).is_ok()
        }
        (RESOURCE_CONTROL, "process_rlimit") => imp::RLIMITS_AVAILABLE,
        (WRITE_PATH_CONTROL, "landlock") => imp::landlock_available(),
        _ => false,
    }
}

/// Everything the child needs, compiled ahead of `fork`.
pub(crate) struct ConfinementSpec<'a> {
    pub syscalls: &'a [String],
    pub capabilities: &'a [String],
    pub writable: Vec<PathBuf>,
    pub manifest: &'a SandboxManifest,
}

impl ConfinementSpec<'_> {
    fn limits(&self) -> [u64; 3] {
        [
            self.manifest.cpu_seconds,
            self.manifest.memory_mb.saturating_mul(MIB),
            self.manifest.disk_mb.saturating_mul(MIB),
        ]
    }
}

pub(crate) use imp::Confinement;

/// Arrange for `confinement` to be applied in the child before `exec`.
pub(crate) fn install(command: &mut Command, confinement: Confinement) {
    // SAFETY: the hook only applies structures compiled in the parent and
    // makes no allocation on its success path.
    unsafe {
        command.pre_exec(move || imp::apply_in_child(&confinement));
    }
}

#[cfg(target_os = "linux")]
mod imp {
    use std::collections::BTreeMap;
    use std::fs;
    use std::io;
    use std::mem::MaybeUninit;

    use landlock::{
        path_beneath_rules, Access, AccessFs, CompatLevel, Compatible, Ruleset, RulesetAttr,
        RulesetCreated, RulesetCreatedAttr, RulesetStatus, ABI,
    };
    use parking_lot::Mutex;
    use seccompiler::{BpfProgram, SeccompAction, SeccompFilter, SeccompRule, TargetArch};

    use super::ConfinementSpec;

    pub(crate) const RLIMITS_AVAILABLE: bool = true;

    const LANDLOCK_ABI: ABI = ABI::V1;
    const CAP_SETPCAP: u32 = 8;

    #[cfg(target_env = "gnu")]
    type Resource = libc::__rlimit_resource_t;
    #[cfg(not(target_env = "gnu"))]
    type Resource = libc::c_int;

    /// Syscall numbers by name. Only x86_64 is mapped; elsewhere the filter
    /// cannot be built and the control reports unenforced.
    #[cfg(target_arch = "x86_64")]
    mod table {
        use seccompiler::TargetArch;

        pub(super) const ARCH: Option<TargetArch> = Some(TargetArch::x86_64);

        pub(super) const SYSCALLS: &[(&str, libc::c_long)] = &[
            ("read", libc::SYS_read),
            ("write", libc::SYS_write),
            ("open", libc::SYS_open),
            ("close", libc::SYS_close),
            ("stat", libc::SYS_stat),
            ("fstat", libc::SYS_fstat),
            ("lstat", libc::SYS_lstat),
            ("poll", libc::SYS_poll),
            ("lseek", libc::SYS_lseek),
            ("mmap", libc::SYS_mmap),
            ("mprotect", libc::SYS_mprotect),
            ("munmap", libc::SYS_munmap),
            ("brk", libc::SYS_brk),
            ("rt_sigaction", libc::SYS_rt_sigaction),
            ("rt_sigprocmask", libc::SYS_rt_sigprocmask),
            ("rt_sigreturn", libc::SYS_rt_sigreturn),
            ("ioctl", libc::SYS_ioctl),
            ("pread64", libc::SYS_pread64),
            ("pwrite64", libc::SYS_pwrite64),
            ("readv", libc::SYS_readv),
            ("writev", libc::SYS_writev),
            ("access", libc::SYS_access),
            ("pipe", libc::SYS_pipe),
            ("select", libc::SYS_select),
            ("sched_yield", libc::SYS_sched_yield),
            ("mremap", libc::SYS_mremap),
            ("madvise", libc::SYS_madvise),
            ("dup", libc::SYS_dup),
            ("dup2", libc::SYS_dup2),
            ("nanosleep", libc::SYS_nanosleep),
            ("getpid", libc::SYS_getpid),
            ("socket", libc::SYS_socket),
            ("socketpair", libc::SYS_socketpair),
            ("connect", libc::SYS_connect),
            ("clone", libc::SYS_clone),
            ("fork", libc::SYS_fork),
            ("vfork", libc::SYS_vfork),
            ("execve", libc::SYS_execve),
            ("exit", libc::SYS_exit),
            ("wait4", libc::SYS_wait4),
            ("kill", libc::SYS_kill),
            ("uname", libc::SYS_uname),
            ("fcntl", libc::SYS_fcntl),
            ("flock", libc::SYS_flock),
            ("fsync", libc::SYS_fsync),
            ("getdents", libc::SYS_getdents),
            ("getcwd", libc::SYS_getcwd),
            ("chdir", libc::SYS_chdir),
            ("rename", libc::SYS_rename),
            ("mkdir", libc::SYS_mkdir),
            ("rmdir", libc::SYS_rmdir),
            ("unlink", libc::SYS_unlink),
            ("readlink", libc::SYS_readlink),
            ("chmod", libc::SYS_chmod),
            ("umask", libc::SYS_umask),
            ("gettimeofday", libc::SYS_gettimeofday),
            ("getrlimit", libc::SYS_getrlimit),
            ("getuid", libc::SYS_getuid),
            ("getgid", libc::SYS_getgid),
            ("geteuid", libc::SYS_geteuid),
            ("getegid", libc::SYS_getegid),
            ("sigaltstack", libc::SYS_sigaltstack),
            ("arch_prctl", libc::SYS_arch_prctl),
            ("prctl", libc::SYS_prctl),
            ("gettid", libc::SYS_gettid),
            ("futex", libc::SYS_futex),
            ("getdents64", libc::SYS_getdents64),
            ("set_tid_address", libc::SYS_set_tid_address),
            ("clock_gettime", libc::SYS_clock_gettime),
            ("clock_nanosleep", libc::SYS_clock_nanosleep),
            ("exit_group", libc::SYS_exit_group),
            ("tgkill", libc::SYS_tgkill),
            ("openat", libc::SYS_openat),
            ("newfstatat", libc::SYS_newfstatat),
            ("unlinkat", libc::SYS_unlinkat),
            ("readlinkat", libc::SYS_readlinkat),
            ("set_robust_list", libc::SYS_set_robust_list),
            ("pipe2", libc::SYS_pipe2),
            ("prlimit64", libc::SYS_prlimit64),
            ("getrandom", libc::SYS_getrandom),
            ("statx", libc::SYS_statx),
            ("rseq", libc::SYS_rseq),
            ("clone3", libc::SYS_clone3),
        ];
    }

    #[cfg(not(target_arch = "x86_64"))]
    mod table {
        use seccompiler::TargetArch;

        pub(super) const ARCH: Option<TargetArch> = None;
        pub(super) const SYSCALLS: &[(&str, libc::c_long)] = &[];
    }

    const CAPABILITIES: &[(&str, u32)] = &[
        ("CAP_CHOWN", 0),
        ("CAP_DAC_OVERRIDE", 1),
        ("CAP_DAC_READ_SEARCH", 2),
        ("CAP_FOWNER", 3),
        ("CAP_FSETID", 4),
        ("CAP_KILL", 5),
        ("CAP_SETGID", 6),
        ("CAP_SETUID", 7),
        ("CAP_SETPCAP", 8),
        ("CAP_LINUX_IMMUTABLE", 9),
        ("CAP_NET_BIND_SERVICE", 10),
        ("CAP_NET_BROADCAST", 11),
        ("CAP_NET_ADMIN", 12),
        ("CAP_NET_RAW", 13),
        ("CAP_IPC_LOCK", 14),
        ("CAP_IPC_OWNER", 15),
        ("CAP_SYS_MODULE", 16),
        ("CAP_SYS_RAWIO", 17),
        ("CAP_SYS_CHROOT", 18),
        ("CAP_SYS_PTRACE", 19),
        ("CAP_SYS_PACCT", 20),
        ("CAP_SYS_ADMIN", 21),
        ("CAP_SYS_BOOT", 22),
        ("CAP_SYS_NICE", 23),
        ("CAP_SYS_RESOURCE", 24),
        ("CAP_SYS_TIME", 25),
        ("CAP_SYS_TTY_CONFIG", 26),
        ("CAP_MKNOD", 27),
        ("CAP_LEASE", 28),
        ("CAP_AUDIT_WRITE", 29),
        ("CAP_AUDIT_CONTROL", 30),
        ("CAP_SETFCAP", 31),
        ("CAP_MAC_OVERRIDE", 32),
        ("CAP_MAC_ADMIN", 33),
        ("CAP_SYSLOG", 34),
        ("CAP_WAKE_ALARM", 35),
        ("CAP_BLOCK_SUSPEND", 36),
        ("CAP_AUDIT_READ", 37),
        ("CAP_PERFMON", 38),
        ("CAP_BPF", 39),
        ("CAP_CHECKPOINT_RESTORE", 40),
    ];

    fn syscall_number(name: &str) -> Option<i64> {
        table::SYSCALLS
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, nr)| i64::from(*nr))
    }

    /// Allowlist filter: listed syscalls pass, anything else kills the
    /// process with `SIGSYS`. Names this table does not know are left out,
    /// which only narrows the allowlist.
    pub(super) fn syscall_filter(allowlist: &[String]) -> Result<BpfProgram, String> {
        let arch: TargetArch = table::ARCH.ok_or_else(|| "unsupported_arch".to_string())?;
        let rules: BTreeMap<i64, Vec<SeccompRule>> = allowlist
            .iter()
            .filter_map(|name| syscall_number(name))
            .map(|nr| (nr, Vec::new()))
            .collect();
        if rules.is_empty() {
            return Err("no_known_syscalls".into());
        }
        let filter = SeccompFilter::new(
            rules,
            SeccompAction::KillProcess,
            SeccompAction::Allow,
            arch,
        )
        .map_err(|e| format!("seccomp_filter:{e}"))?;
        filter
            .try_into()
            .map_err(|e: seccompiler::BackendError| format!("seccomp_compile:{e}"))
    }

    #[derive(Clone, Copy, Debug, Default)]
    struct CapSets {
        inheritable: u64,
        permitted: u64,
        effective: u64,
        ambient: u64,
    }

    fn current_capabilities() -> io::Result<CapSets> {
        let status = fs::read_to_string("/proc/self/status")?;
        let mut caps = CapSets::default();
        for line in status.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let Ok(mask) = u64::from_str_radix(value.trim(), 16) else {
                continue;
            };
            match key {
                "CapInh" => caps.inheritable = mask,
                "CapPrm" => caps.permitted = mask,
                "CapEff" => caps.effective = mask,
                "CapAmb" => caps.ambient = mask,
                _ => {}
            }
        }
        Ok(caps)
    }

    /// Capabilities the child must drop from its bounding set. Empty when
    /// none of them are held; under `no_new_privs` an exec cannot grant them.
    pub(super) fn capability_drops(names: &[String]) -> Result<Vec<u32>, String> {
        let mut numbers = Vec::with_capacity(names.len());
        for name in names {
            let nr = CAPABILITIES
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(name))
                .map(|(_, nr)| *nr)
                .ok_or_else(|| format!("unknown_capability:{name}"))?;
            numbers.push(nr);
        }
        let mask = numbers.iter().fold(0u64, |m, nr| m | (1 << nr));
        let caps = current_capabilities().map_err(|e| format!("capabilities_unreadable:{e}"))?;
        if (caps.permitted | caps.effective | caps.ambient | caps.inheritable) & mask == 0 {
            return Ok(Vec::new());
        }
        if caps.inheritable & mask != 0 {
            return Err("inheritable_capability_held".into());
        }
        if caps.effective & (1 << CAP_SETPCAP) == 0 {
            return Err("capability_held_without_setpcap".into());
        }
        Ok(numbers)
    }

    fn write_ruleset() -> Result<Ruleset, landlock::RulesetError> {
        Ruleset::default()
            .set_compatibility(CompatLevel::HardRequirement)
            .handle_access(AccessFs::from_write(LANDLOCK_ABI))
    }

    pub(super) fn landlock_available() -> bool {
        write_ruleset().and_then(Ruleset::create).is_ok()
    }

    /// Compiled controls for one child.
    pub(crate) struct Confinement {
        filter: BpfProgram,
        drops: Vec<u32>,
        limits: [u64; 3],
        ruleset: Mutex<Option<RulesetCreated>>,
    }

    impl Confinement {
        pub(crate) fn build(spec: &ConfinementSpec<'_>) -> Result<Self, String> {
            let filter = syscall_filter(spec.syscalls)?;
            let drops = capability_drops(spec.capabilities)?;
            let ruleset = write_ruleset()
                .and_then(Ruleset::create)
                .and_then(|r| r.add_rules(path_beneath_rules(&spec.writable, AccessFs::from_write(LANDLOCK_ABI))))
                .map_err(|e| format!("landlock:{e}"))?;
            Ok(Self {
                filter,
                drops,
                limits: spec.limits(),
                ruleset: Mutex::new(Some(ruleset)),
            })
        }
    }

    fn check(rc: libc::c_int) -> io::Result<()> {
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    fn set_limit(resource: Resource, value: u64) -> io::Result<()> {
        let limit = libc::rlimit {
            rlim_cur: value as libc::rlim_t,
            rlim_max: value as libc::rlim_t,
        };
        // SAFETY: `limit` is a valid rlimit for the duration of the call.
        check(unsafe { libc::setrlimit(resource, &limit) })
    }

    /// Runs in the forked child. Only syscalls and pre-built data.
    pub(super) fn apply_in_child(confinement: &Confinement) -> io::Result<()> {
        let [cpu, memory, disk] = confinement.limits;
        set_limit(libc::RLIMIT_CPU, cpu)?;
        set_limit(libc::RLIMIT_AS, memory)?;
        set_limit(libc::RLIMIT_FSIZE, disk)?;
        set_limit(libc::RLIMIT_CORE, 0)?;

        for cap in &confinement.drops {
            // SAFETY: prctl with integer arguments only.
            check(unsafe {
                libc::prctl(libc::PR_CAPBSET_DROP, libc::c_ulong::from(*cap), 0, 0, 0)
            })?;
        }
        if !confinement.drops.is_empty() {
            // SAFETY: prctl with integer arguments only.
            check(unsafe {
                libc::prctl(
                    libc::PR_CAP_AMBIENT,
                    libc::PR_CAP_AMBIENT_CLEAR_ALL as libc::c_ulong,
                    0,
                    0,
                    0,
                )
            })?;
        }

        let ruleset = confinement
            .ruleset
            .lock()
            .take()
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EINVAL))?;
        match ruleset.restrict_self() {
            Ok(status) if status.ruleset == RulesetStatus::FullyEnforced => {}
            _ => return Err(io::Error::from_raw_os_error(libc::EPERM)),
        }

        seccompiler::apply_filter(&confinement.filter)
            .map_err(|_| io::Error::from_raw_os_error(libc::EPERM))
    }

    /// Exit status and resource usage of a reaped child.
    #[derive(Clone, Copy, Debug)]
    pub(crate) struct Reaped {
        pub status: libc::c_int,
        pub cpu_s: f64,
        pub max_rss_kb: i64,
    }

    /// Waits for `pid` to exit without reaping it, so the pid cannot be
    /// reused while [`kill_group`] may still signal it, then reaps it with
    /// `wait4` to collect rusage.
    pub(crate) fn wait_for(pid: libc::pid_t, reaped: &Mutex<bool>) -> io::Result<Reaped> {
        let mut info = MaybeUninit::<libc::siginfo_t>::zeroed();
        loop {
            // SAFETY: `info` is a valid out-pointer for one siginfo_t.
            let rc = unsafe {
                libc::waitid(
                    libc::P_PID,
                    pid as libc::id_t,
                    info.as_mut_ptr(),
                    libc::WEXITED | libc::WNOWAIT,
                )
            };
            if rc == 0 {
                break;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }

        let mut guard = reaped.lock();
        let mut status: libc::c_int = 0;
        let mut usage = MaybeUninit::<libc::rusage>::zeroed();
        // SAFETY: both out-pointers are valid; the child is a zombie, so this
        // returns immediately.
        let rc = unsafe { libc::wait4(pid, &mut status, 0, usage.as_mut_ptr()) };
        if rc != pid {
            return Err(io::Error::last_os_error());
        }
        *guard = true;
        // SAFETY: wait4 succeeded and filled `usage`.
        let usage = unsafe { usage.assume_init() };
        let seconds = |tv: libc::timeval| tv.tv_sec as f64 + tv.tv_usec as f64 / 1e6;
        Ok(Reaped {
            status,
            cpu_s: seconds(usage.ru_utime) + seconds(usage.ru_stime),
            max_rss_kb: usage.ru_maxrss as i64,
        })
    }

    /// Kills the child's process group unless it was already reaped.
    pub(crate) fn kill_group(pid: libc::pid_t, reaped: &Mutex<bool>) {
        let guard = reaped.lock();
        if !*guard {
            // SAFETY: signalling a process group we created; the leader is
            // not yet reaped, so the id is still ours.
            unsafe {
                libc::kill(-pid, libc::SIGKILL);
            }
        }
        drop(guard);
    }
}

#[cfg(not(target_os = "linux"))]
mod imp {
    use std::io;

    use parking_lot::Mutex;

    use super::ConfinementSpec;

    pub(crate) const RLIMITS_AVAILABLE: bool = false;

    pub(super) fn syscall_filter(_allowlist: &[String]) -> Result<(), String> {
        Err("unsupported_os".into())
    }

    pub(super) fn capability_drops(_names: &[String]) -> Result<(), String> {
        Err("unsupported_os".into())
    }

    pub(super) fn landlock_available() -> bool {
        false
    }

    pub(crate) struct Confinement;

    impl Confinement {
        pub(crate) fn build(_spec: &ConfinementSpec<'_>) -> Result<Self, String> {
            Err("unsupported_os".into())
        }
    }

    pub(super) fn apply_in_child(_confinement: &Confinement) -> io::Result<()> {
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }

    #[derive(Clone, Copy, Debug)]
    pub(crate) struct Reaped {
        pub status: i32,
        pub cpu_s: f64,
        pub max_rss_kb: i64,
    }

    pub(crate) fn wait_for(_pid: i32, _reaped: &Mutex<bool>) -> io::Result<Reaped> {
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }

    pub(crate) fn kill_group(_pid: i32, _reaped: &Mutex<bool>) {}
}

pub(crate) use imp::{kill_group, wait_for};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isolation::{IsolationBackend, ProcessIsolationBackend};
    use crate::manifest::ReplaySeed;
    use crate::policy::SandboxPolicy;

    fn control(name: &str, mechanism: &str, scope: &[&str]) -> EnforcedControl {
        let policy = SandboxPolicy::default_v1();
        let manifest = SandboxManifest::for_policy("m", "e", ReplaySeed::from_u64(1), ["true"], &policy);
        let mut c = ProcessIsolationBackend::default()
            .prepare(&manifest, &policy)
            .unwrap()
            .control(name)
            .cloned()
            .unwrap();
        c.mechanism = mechanism.into();
        c.scope = scope.iter().map(|s| s.to_string()).collect();
        c
    }

    #[test]
    fn unknown_syscalls_leave_the_allowlist_unenforced() {
        let c = control(SYSCALL_CONTROL, "seccomp", &["not_a_syscall", "also_not_one"]);
        assert!(!supports(&c));
    }

    #[test]
    fn foreign_mechanisms_are_never_supported() {
        let c = control(SYSCALL_CONTROL, "container_seccomp", &["read"]);
        assert!(!supports(&c));
        let c = control(RESOURCE_CONTROL, "container_cgroup", &[]);
        assert!(!supports(&c));
    }

    #[test]
    fn unknown_capability_is_unenforceable() {
        let c = control(CAPABILITY_CONTROL, "process_capability_drop", &["CAP_MADE_UP"]);
        assert!(!supports(&c));
    }

    #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
    #[test]
    fn known_allowlist_compiles_to_a_filter() {
        let c = control(SYSCALL_CONTROL, "seccomp", &["read", "write", "exit_group"]);
        assert!(supports(&c));
    }

    #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
    #[test]
    fn socket_ban_rides_on_the_default_filter() {
        let policy = SandboxPolicy::default_v1();
        let manifest = SandboxManifest::for_policy("m", "e", ReplaySeed::from_u64(1), ["true"], &policy);
        let plan = ProcessIsolationBackend::default().prepare(&manifest, &policy).unwrap();
        assert!(supports(plan.control(NETWORK_CONTROL).unwrap()));
        assert!(supports(plan.control(SYSCALL_CONTROL).unwrap()));
    }
}
