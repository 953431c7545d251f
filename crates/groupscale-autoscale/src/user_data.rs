//! Boot payload for new instances.
//!
//! New group members boot with a shell script that installs the kubelet at
//! the cluster's version and joins the cluster. Both values come from the
//! process environment and are validated once at startup; a malformed
//! value stops the process before any group is served.
//!
//! ```text
//! GROUPSCALE_KUBE_VERSION       1.17.4
//! GROUPSCALE_KUBE_JOIN_COMMAND  kubeadm join 10.0.0.1:6443 --token abcdef.0123456789abcdef \
//!                                   --discovery-token-ca-cert-hash sha256:<hex>
//! ```

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use regex::Regex;
use tracing::debug;

use crate::error::BootError;

pub const KUBE_VERSION_ENV: &str = "GROUPSCALE_KUBE_VERSION";
pub const JOIN_COMMAND_ENV: &str = "GROUPSCALE_KUBE_JOIN_COMMAND";

const JOIN_COMMAND_PATTERN: &str = r"^kubeadm +join +[0-9.]+:[0-9]+ +--token +[a-z0-9]{6}\.[a-z0-9]{16} +--discovery-token-ca-cert-hash +sha256:[0-9a-f]+$";

const NODE_SCRIPT: &str = include_str!("../templates/node-bootstrap.sh");

/// Validated inputs of the boot payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootConfig {
    kube_version: String,
    join_command: String,
}

impl BootConfig {
    /// Validate and wrap the two template inputs.
    pub fn new(kube_version: &str, join_command: &str) -> Result<Self, BootError> {
        semver::Version::parse(kube_version).map_err(|e| BootError::InvalidVersion {
            value: kube_version.to_string(),
            reason: e.to_string(),
        })?;
        if !is_valid_join_command(join_command) {
            return Err(BootError::InvalidJoinCommand);
        }
        Ok(Self {
            kube_version: kube_version.to_string(),
            join_command: join_command.to_string(),
        })
    }

    /// Read both inputs from the process environment.
    pub fn from_env() -> Result<Self, BootError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read both inputs through `lookup` (the environment, or a map in tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, BootError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let join_command =
            lookup(JOIN_COMMAND_ENV).ok_or(BootError::MissingEnv(JOIN_COMMAND_ENV))?;
        let kube_version =
            lookup(KUBE_VERSION_ENV).ok_or(BootError::MissingEnv(KUBE_VERSION_ENV))?;
        Self::new(kube_version.trim(), join_command.trim())
    }

    pub fn kube_version(&self) -> &str {
        &self.kube_version
    }

    /// The boot script in clear text.
    pub fn render_script(&self) -> String {
        format!(
            "#!/bin/bash\nk8s_version=\"{}\"\nkubeadm_join_command=\"{}\"\n{}",
            self.kube_version, self.join_command, NODE_SCRIPT
        )
    }

    /// The boot script as the base64 blob carried in a launch template.
    pub fn user_data(&self) -> String {
        debug!(kube_version = %self.kube_version, "rendering user data");
        STANDARD.encode(self.render_script())
    }
}

fn is_valid_join_command(command: &str) -> bool {
    Regex::new(JOIN_COMMAND_PATTERN).is_ok_and(|re| re.is_match(command))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const JOIN: &str = "kubeadm join 10.241.0.5:6443 --token abcdef.0123456789abcdef --discovery-token-ca-cert-hash sha256:3f5a7c9e0b1d";

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn accepts_well_formed_inputs() {
        let config = BootConfig::new("1.17.4", JOIN).unwrap();
        assert_eq!(config.kube_version(), "1.17.4");
    }

    #[test]
    fn rejects_malformed_join_commands() {
        let bad = [
            "",
            "kubeadm join example.com:6443 --token abcdef.0123456789abcdef --discovery-token-ca-cert-hash sha256:abc",
            "kubeadm join 10.0.0.1:6443 --token ABCDEF.0123456789abcdef --discovery-token-ca-cert-hash sha256:abc",
            "kubeadm join 10.0.0.1:6443 --token abcdef.0123 --discovery-token-ca-cert-hash sha256:abc",
            "kubeadm join 10.0.0.1:6443 --token abcdef.0123456789abcdef --discovery-token-ca-cert-hash sha256:XYZ",
            "kubeadm join 10.0.0.1:6443 --token abcdef.0123456789abcdef --discovery-token-ca-cert-hash sha256:abc; rm -rf /",
        ];
        for command in bad {
            assert_eq!(
                BootConfig::new("1.17.4", command),
                Err(BootError::InvalidJoinCommand),
                "{command:?}"
            );
        }
    }

    #[test]
    fn rejects_malformed_versions() {
        let err = BootConfig::new("latest", JOIN).unwrap_err();
        assert!(matches!(err, BootError::InvalidVersion { .. }));
    }

    #[test]
    fn lookup_reports_the_missing_variable() {
        let vars = env(&[(KUBE_VERSION_ENV, "1.17.4")]);
        assert_eq!(
            BootConfig::from_lookup(|k| vars.get(k).cloned()),
            Err(BootError::MissingEnv(JOIN_COMMAND_ENV))
        );

        let vars = env(&[(JOIN_COMMAND_ENV, JOIN)]);
        assert_eq!(
            BootConfig::from_lookup(|k| vars.get(k).cloned()),
            Err(BootError::MissingEnv(KUBE_VERSION_ENV))
        );
    }

    #[test]
    fn lookup_reads_both_values() {
        let vars = env(&[(KUBE_VERSION_ENV, "1.18.0\n"), (JOIN_COMMAND_ENV, JOIN)]);
        let config = BootConfig::from_lookup(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(config.kube_version(), "1.18.0");
    }

    #[test]
    fn script_embeds_inputs_verbatim() {
        let script = BootConfig::new("1.17.4", JOIN).unwrap().render_script();
        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains("k8s_version=\"1.17.4\""));
        assert!(script.contains(&format!("kubeadm_join_command=\"{JOIN}\"")));
        assert!(script.contains("${kubeadm_join_command}"));
    }

    #[test]
    fn script_adds_package_repository_before_versioned_install() {
        let script = BootConfig::new("1.17.4", JOIN).unwrap().render_script();
        let key = script.find("apt-key add -").unwrap();
        let repo = script
            .find("apt-add-repository -y 'deb http://apt.kubernetes.io/ kubernetes-xenial main'")
            .unwrap();
        let install = script.find("\"kubeadm=${k8s_version}-00\"").unwrap();
        let join = script.find("${kubeadm_join_command}").unwrap();
        assert!(key < repo);
        assert!(repo < install);
        assert!(install < join);
    }

    #[test]
    fn user_data_is_base64_of_script() {
        let config = BootConfig::new("1.17.4", JOIN).unwrap();
        let decoded = STANDARD.decode(config.user_data()).unwrap();
        assert_eq!(String::from_utf8(decoded).unwrap(), config.render_script());
    }
}
