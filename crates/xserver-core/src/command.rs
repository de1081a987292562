use std::path::PathBuf;

use crate::error::StartError;
use crate::version_probe::VersionProbe;

/// Everything [`XCommandBuilder`] needs to assemble one invocation, mirroring
/// the configurable fields of `LocalXServer` state.
#[derive(Debug, Clone)]
pub struct CommandOptions {
    pub command: String,
    pub display_number: u32,
    pub config_file: Option<String>,
    pub layout: Option<String>,
    pub xdg_seat: Option<String>,
    pub allow_tcp: bool,
    pub background: Option<String>,
    pub vt: i32,
    pub xdmcp_server: Option<String>,
    pub xdmcp_port: u16,
    pub xdmcp_key: Option<String>,
}

/// Resolves `command`'s first whitespace-separated token against `PATH`;
/// returns the absolute path and the verbatim remainder of the string as
/// extra leading arguments.
fn resolve_command(command: &str) -> Option<(PathBuf, Vec<String>)> {
    let mut parts = command.splitn(2, char::is_whitespace);
    let program = parts.next()?;
    let extra_args: Vec<String> = parts
        .next()
        .map(|rest| rest.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();

    let absolute = if program.contains('/') {
        let path = PathBuf::from(program);
        path.is_file().then_some(path)
    } else {
        std::env::var_os("PATH").and_then(|path_var| {
            std::env::split_paths(&path_var)
                .map(|dir| dir.join(program))
                .find(|candidate| candidate.is_file())
        })
    }?;

    Some((absolute, extra_args))
}

/// Builds the argv for one X server invocation, in a fixed order so that two
/// servers differing only by, say, display number produce diffable log
/// lines.
pub struct XCommandBuilder;

impl XCommandBuilder {
    /// Assemble argv. `authority_path` is `None` when no authority file was
    /// produced (the command simply omits `-auth`). `add_args` is the
    /// subclass hook from step 11 of the assembly order: additional
    /// arguments appended last.
    pub fn build(
        options: &CommandOptions,
        authority_path: Option<&std::path::Path>,
        version_probe: &VersionProbe,
        add_args: &[String],
    ) -> Result<Vec<String>, StartError> {
        let (program, mut extra_args) = resolve_command(&options.command)
            .ok_or_else(|| StartError::BinaryNotFound(options.command.clone()))?;

        let mut argv = vec![program.to_string_lossy().into_owned()];
        argv.append(&mut extra_args);
        argv.push(format!(":{}", options.display_number));

        if let Some(config_file) = &options.config_file {
            argv.push("-config".into());
            argv.push(config_file.clone());
        }
        if let Some(layout) = &options.layout {
            argv.push("-layout".into());
            argv.push(layout.clone());
        }
        if let Some(seat) = &options.xdg_seat {
            argv.push("-seat".into());
            argv.push(seat.clone());
        }
        if let Some(path) = authority_path {
            argv.push("-auth".into());
            argv.push(path.to_string_lossy().into_owned());
        }

        if let Some(xdmcp_server) = &options.xdmcp_server {
            if options.xdmcp_port != 0 {
                argv.push("-port".into());
                argv.push(options.xdmcp_port.to_string());
            }
            argv.push("-query".into());
            argv.push(xdmcp_server.clone());
            if let Some(key) = &options.xdmcp_key {
                argv.push("-cookie".into());
                argv.push(key.clone());
            }
        } else if options.allow_tcp {
            if version_probe.compare(&options.command, 1, 17).is_ge() {
                argv.push("-listen".into());
                argv.push("tcp".into());
            }
        } else {
            argv.push("-nolisten".into());
            argv.push("tcp".into());
        }

        if options.vt >= 0 {
            argv.push(format!("vt{}", options.vt));
            argv.push("-novtswitch".into());
        }

        if let Some(background) = &options.background {
            argv.push("-background".into());
            argv.push(background.clone());
        }

        argv.extend(add_args.iter().cloned());

        Ok(argv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_options() -> CommandOptions {
        CommandOptions {
            command: "/bin/true".into(),
            display_number: 7,
            config_file: None,
            layout: None,
            xdg_seat: None,
            allow_tcp: false,
            background: None,
            vt: -1,
            xdmcp_server: None,
            xdmcp_port: 0,
            xdmcp_key: None,
        }
    }

    #[test]
    fn unresolvable_command_fails_before_spawn() {
        let mut options = base_options();
        options.command = "definitely-not-a-real-binary".into();
        let probe = VersionProbe::new();
        let err = XCommandBuilder::build(&options, None, &probe, &[]).unwrap_err();
        assert!(matches!(err, StartError::BinaryNotFound(_)));
    }

    #[test]
    fn default_options_block_tcp_and_omit_vt() {
        let options = base_options();
        let probe = VersionProbe::new();
        let argv = XCommandBuilder::build(&options, None, &probe, &[]).unwrap();
        assert_eq!(argv[1], ":7");
        assert!(argv.contains(&"-nolisten".to_string()));
        assert!(!argv.iter().any(|arg| arg.starts_with("vt")));
    }

    #[test]
    fn vt_zero_still_emits_the_novtswitch_flag() {
        let mut options = base_options();
        options.vt = 0;
        let probe = VersionProbe::new();
        let argv = XCommandBuilder::build(&options, None, &probe, &[]).unwrap();
        assert!(argv.contains(&"vt0".to_string()));
        assert!(argv.contains(&"-novtswitch".to_string()));
    }

    #[test]
    fn xdmcp_server_suppresses_tcp_listen_flags() {
        let mut options = base_options();
        options.allow_tcp = true;
        options.xdmcp_server = Some("203.0.113.1".into());
        options.xdmcp_port = 177;
        let probe = VersionProbe::new();
        let argv = XCommandBuilder::build(&options, None, &probe, &[]).unwrap();
        assert!(argv.contains(&"-query".to_string()));
        assert!(!argv.iter().any(|arg| arg == "-listen" || arg == "-nolisten"));
    }

    #[test]
    fn authority_path_is_omitted_when_none() {
        let options = base_options();
        let probe = VersionProbe::new();
        let argv = XCommandBuilder::build(&options, None, &probe, &[]).unwrap();
        assert!(!argv.contains(&"-auth".to_string()));
    }
}
