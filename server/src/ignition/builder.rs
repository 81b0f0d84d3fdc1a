//! Deterministic assembly of the per-machine ignition document.

use ember_core::{EmberError, EnvInputs, Result};

use super::encode::{base64_uri, plain_text_uri};
use super::nmstate::{profiles_to_files, NetworkStateRenderer};
use super::types::{Contents, File, IgnitionConfig, PasswdUser, Unit};

/// Default port of the provisioning API.
const API_PORT: u16 = 6385;

/// Default port of the inspection callback service.
const INSPECTION_PORT: u16 = 5050;

/// Path the agent reports inspection results to.
const INSPECTION_CALLBACK_PATH: &str = "/v1/continue";

/// Agent configuration file inside the booted image.
const AGENT_CONF_PATH: &str = "/etc/provisioning-agent.conf";

/// Credentials for pulling the agent container image.
const AUTH_FILE_PATH: &str = "/etc/authfile.json";

/// Registries mirror configuration.
const REGISTRIES_CONF_PATH: &str = "/etc/containers/registries.conf";

/// Login account that receives the authorized SSH key.
const SSH_USER: &str = "core";

const CLIENTID_CONF_PATH: &str = "/etc/NetworkManager/conf.d/clientid.conf";
const CLIENTID_CONF: &str = "[connection]
ipv6.dhcp-duid=ll
ipv6.dhcp-iaid=mac
";

const HOSTNAME_DISPATCHER_PATH: &str = "/etc/NetworkManager/dispatcher.d/01-hostname";
const HOSTNAME_DISPATCHER: &str = "#!/bin/bash
export LANG=C
if [ -n \"$DHCP6_FQDN_FQDN\" ] && [[ \"$DHCP6_FQDN_FQDN\" =~ \".\" ]]; then
    hostnamectl set-hostname --static --transient \"$DHCP6_FQDN_FQDN\"
fi
";

/// Builds one ignition document from the deployment environment plus
/// the per-request network state and hostname.
pub struct IgnitionBuilder<'a> {
    inputs: &'a EnvInputs,
    renderer: &'a dyn NetworkStateRenderer,
    hostname: String,
    network_state: Vec<u8>,
    registries_conf: Option<Vec<u8>>,
}

impl<'a> IgnitionBuilder<'a> {
    pub fn new(inputs: &'a EnvInputs, renderer: &'a dyn NetworkStateRenderer) -> Self {
        Self {
            inputs,
            renderer,
            hostname: String::new(),
            network_state: Vec::new(),
            registries_conf: None,
        }
    }

    /// Hostname the booted machine requests for itself.
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Raw declarative network-state bytes for this machine.
    pub fn network_state(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.network_state = data.into();
        self
    }

    /// Registries mirror file content to embed.
    pub fn registries_conf(mut self, data: Option<Vec<u8>>) -> Self {
        self.registries_conf = data;
        self
    }

    /// Assemble and validate the document.
    pub fn build(&self) -> Result<IgnitionConfig> {
        if self.inputs.api_base_url.is_empty() {
            return Err(EmberError::Configuration(
                "API base URL is required".to_string(),
            ));
        }

        let mut config = IgnitionConfig::default();
        config.storage.files.push(self.agent_conf());

        if !self.inputs.agent_pull_secret.is_empty() {
            config.storage.files.push(self.auth_file());
        }

        config.storage.files.push(fixed_file(CLIENTID_CONF_PATH, CLIENTID_CONF, 0o644));
        config
            .storage
            .files
            .push(fixed_file(HOSTNAME_DISPATCHER_PATH, HOSTNAME_DISPATCHER, 0o755));

        if let Some(registries) = &self.registries_conf {
            config.storage.files.push(File {
                path: REGISTRIES_CONF_PATH.to_string(),
                contents: Contents {
                    source: plain_text_uri(&String::from_utf8_lossy(registries)),
                },
                ..Default::default()
            });
        }

        let mut copy_network = false;
        if !self.network_state.is_empty() {
            let rendered = self.renderer.render(&self.network_state)?;
            let profiles = profiles_to_files(&rendered)?;
            copy_network = !profiles.is_empty();
            config.storage.files.extend(profiles);
        }

        if !self.inputs.ramdisk_ssh_key.is_empty() {
            config.passwd.users.push(PasswdUser {
                name: SSH_USER.to_string(),
                ssh_authorized_keys: vec![self.inputs.ramdisk_ssh_key.trim().to_string()],
            });
        }

        config.systemd.units.push(self.agent_service(copy_network));

        config.validate()?;
        tracing::debug!(
            files = config.storage.files.len(),
            hostname = %self.hostname,
            "assembled ignition document"
        );
        Ok(config)
    }

    /// The agent configuration file (ini-style).
    fn agent_conf(&self) -> File {
        let api_url = normalize_urls(&self.inputs.api_base_url, API_PORT);
        let callback_url = if self.inputs.inspector_base_url.is_empty() {
            String::new()
        } else {
            format!(
                "{}{}",
                normalize_urls(&self.inputs.inspector_base_url, INSPECTION_PORT),
                INSPECTION_CALLBACK_PATH
            )
        };

        let mut content = format!(
            "[DEFAULT]\napi_url = {}\ninspection_callback_url = {}\ninsecure = True\n",
            api_url, callback_url
        );
        if !self.inputs.vlan_interfaces.is_empty() {
            content.push_str(&format!(
                "enable_vlan_interfaces = {}\n",
                self.inputs.vlan_interfaces
            ));
        }

        File {
            path: AGENT_CONF_PATH.to_string(),
            contents: Contents {
                source: plain_text_uri(&content),
            },
            ..Default::default()
        }
    }

    /// Pull credentials, embedded base64.
    fn auth_file(&self) -> File {
        File {
            path: AUTH_FILE_PATH.to_string(),
            contents: Contents {
                source: base64_uri(self.inputs.agent_pull_secret.as_bytes()),
            },
            ..Default::default()
        }
    }

    /// The service unit that runs the agent in an isolated container.
    fn agent_service(&self, copy_network: bool) -> Unit {
        let image = &self.inputs.agent_image;

        let mut pull = format!("/bin/podman pull {} --tls-verify=false", image);
        if !self.inputs.agent_pull_secret.is_empty() {
            pull.push_str(&format!(" --authfile={}", AUTH_FILE_PATH));
        }

        let run = format!(
            concat!(
                "/bin/podman run --rm --privileged --network host --name provisioning-agent",
                " --env \"BOOT_IP_OPTIONS={ip_options}\"",
                " --env \"AGENT_HOSTNAME={hostname}\"",
                " --env \"AGENT_COPY_NETWORK={copy_network}\"",
                " --mount type=bind,src={conf},dst=/etc/provisioning-agent/agent.conf",
                " --mount type=bind,src=/dev,dst=/dev",
                " --mount type=bind,src=/sys,dst=/sys",
                " --mount type=bind,src=/run/dbus/system_bus_socket,dst=/run/dbus/system_bus_socket",
                " --mount type=bind,src=/run/udev,dst=/run/udev",
                " --mount type=bind,src=/,dst=/mnt/host",
                " {image}"
            ),
            ip_options = self.inputs.boot_ip_options,
            hostname = self.hostname,
            copy_network = copy_network,
            conf = AGENT_CONF_PATH,
            image = image,
        );

        // Proxy lines are always emitted, even when empty, so an
        // override earlier in boot cannot leak through.
        let contents = format!(
            concat!(
                "[Unit]\n",
                "Description=Provisioning Agent\n",
                "After=network-online.target\n",
                "Wants=network-online.target\n",
                "[Service]\n",
                "Environment=HTTP_PROXY={http_proxy}\n",
                "Environment=HTTPS_PROXY={https_proxy}\n",
                "Environment=NO_PROXY={no_proxy}\n",
                "TimeoutStartSec=0\n",
                "Restart=always\n",
                "RestartSec=30\n",
                "ExecStartPre={pull}\n",
                "ExecStart={run}\n",
                "[Install]\n",
                "WantedBy=multi-user.target\n"
            ),
            http_proxy = self.inputs.http_proxy,
            https_proxy = self.inputs.https_proxy,
            no_proxy = self.inputs.no_proxy,
            pull = pull,
            run = run,
        );

        Unit {
            name: "provisioning-agent.service".to_string(),
            enabled: Some(true),
            contents: Some(contents),
        }
    }
}

fn fixed_file(path: &str, content: &str, mode: u32) -> File {
    File {
        path: path.to_string(),
        mode: Some(mode),
        contents: Contents {
            source: plain_text_uri(content),
        },
        ..Default::default()
    }
}

/// Append the default port to every endpoint that lacks one.
///
/// `urls` is one endpoint or a comma-separated dual-stack pair; order is
/// preserved and the operation is idempotent. IPv6 literals in brackets
/// without a port end in `]` and get the port appended after them.
fn normalize_urls(urls: &str, port: u16) -> String {
    urls.split(',')
        .map(|endpoint| {
            if has_explicit_port(endpoint) {
                endpoint.to_string()
            } else {
                format!("{}:{}", endpoint, port)
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn has_explicit_port(endpoint: &str) -> bool {
    if endpoint.ends_with(']') {
        // Bracketed IPv6 literal with no trailing port
        return false;
    }
    match endpoint.rsplit_once(':') {
        Some((_, tail)) => !tail.is_empty() && tail.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}
