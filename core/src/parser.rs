use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DocumentError {
    #[error("failed to read document: {0}")]
    Io(String),
    #[error("XML parsing error: {0}")]
    Xml(String),
    #[error("document has no root element")]
    NoRootElement,
    #[error("unexpected element <{0}> after the root element")]
    TrailingContent(String),
    #[error("unexpected text {0:?} outside the root element")]
    StrayText(String),
    #[error("unexpected end of document inside <{0}>")]
    UnexpectedEof(String),
    #[error("invalid port id on open port: {0:?}")]
    InvalidPort(String),
}

/// One scan document after parsing, ready for aggregation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParsedDocument {
    pub name: String,
    pub scanned_at: String,
    pub hosts: Vec<HostEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostEntry {
    pub address: String,
    pub hostnames: Vec<String>,
    pub os_guess: String,
    /// Open ports only.
    pub ports: Vec<RawPort>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawPort {
    pub port: u16,
    pub protocol: String,
    pub service: String,
    pub product: Option<String>,
    pub fingerprint: Option<String>,
    /// Every `<script>` under the port, in document order.
    pub scripts: Vec<ScriptResult>,
}

impl RawPort {
    pub fn last_script(&self) -> Option<&ScriptResult> {
        self.scripts.last()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScriptResult {
    pub id: String,
    pub output: String,
}

/// Reads one document from disk. The scan timestamp is the file's
/// modification time in RFC 3339 (UTC).
pub fn load_document(path: &Path) -> Result<ParsedDocument, DocumentError> {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string());

    let bytes = fs::read(path).map_err(|err| DocumentError::Io(format!("{:?}: {err}", path)))?;

    let scanned_at = fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| OffsetDateTime::from(modified).format(&Rfc3339).ok())
        .unwrap_or_else(|| "unknown".to_string());

    parse_document(&name, &scanned_at, &bytes)
}

pub fn parse_document(
    name: &str,
    scanned_at: &str,
    xml: &[u8],
) -> Result<ParsedDocument, DocumentError> {
    let hosts = parse_hosts(xml)?;
    Ok(ParsedDocument {
        name: name.to_string(),
        scanned_at: scanned_at.to_string(),
        hosts,
    })
}

/// Extracts the `<host>` children of the root element.
///
/// Hosts without a `<ports>` block are dropped. Only the first `<ports>`
/// and `<os>` blocks of a host are read, and only ports whose first
/// `<state>` says `open` are kept.
pub fn parse_hosts(xml: &[u8]) -> Result<Vec<HostEntry>, DocumentError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut walker = HostWalker::default();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(element)) => {
                walker.open(&element, false)?;
            }
            Ok(Event::Empty(element)) => {
                walker.open(&element, true)?;
            }
            Ok(Event::End(_)) => {
                walker.close()?;
            }
            Ok(Event::Text(text)) => {
                let content = text
                    .unescape()
                    .map_err(|err| DocumentError::Xml(err.to_string()))?;
                walker.text(&content)?;
            }
            Ok(Event::CData(data)) => {
                walker.text(&String::from_utf8_lossy(&data))?;
            }
            Ok(Event::Eof) => break,
            Err(err) => return Err(DocumentError::Xml(err.to_string())),
            _ => {}
        }
        buf.clear();
    }

    walker.finish()
}

#[derive(Default)]
struct HostWalker {
    stack: Vec<String>,
    root_seen: bool,
    hosts: Vec<HostEntry>,
    current_host: Option<HostBuilder>,
    current_port: Option<PortBuilder>,
}

impl HostWalker {
    fn open(&mut self, element: &BytesStart<'_>, is_empty: bool) -> Result<(), DocumentError> {
        let name = String::from_utf8_lossy(element.name().as_ref()).to_string();
        check_attributes(element)?;

        if self.stack.is_empty() {
            if self.root_seen {
                return Err(DocumentError::TrailingContent(name));
            }
            self.root_seen = true;
        }

        {
            let parents: Vec<&str> = self.stack.iter().map(String::as_str).collect();
            match (parents.as_slice(), name.as_str()) {
                ([_], "host") => {
                    // an empty <host/> has no ports block and is dropped
                    if !is_empty {
                        self.current_host = Some(HostBuilder::default());
                    }
                }
                ([_, "host"], "address") => {
                    if let Some(host) = self.current_host.as_mut() {
                        if !host.address_seen {
                            host.address_seen = true;
                            host.address = attribute(element, b"addr")?;
                        }
                    }
                }
                ([_, "host", "hostnames"], "hostname") => {
                    if let Some(host) = self.current_host.as_mut() {
                        if let Some(hostname) = attribute(element, b"name")? {
                            host.hostnames.push(hostname);
                        }
                    }
                }
                ([_, "host"], "os") => {
                    if let Some(host) = self.current_host.as_mut() {
                        host.os_blocks += 1;
                    }
                }
                ([_, "host", "os"], "osmatch") => {
                    if let Some(host) = self.current_host.as_mut() {
                        if host.os_blocks == 1 && host.os_guess.is_none() {
                            host.os_guess = Some(
                                attribute(element, b"name")?
                                    .unwrap_or_else(|| "unknown".to_string()),
                            );
                        }
                    }
                }
                ([_, "host"], "ports") => {
                    if let Some(host) = self.current_host.as_mut() {
                        host.port_blocks += 1;
                    }
                }
                ([_, "host", "ports"], "port") => {
                    let in_first_block = self
                        .current_host
                        .as_ref()
                        .is_some_and(|host| host.port_blocks == 1);
                    // an empty <port/> carries no state, so it can never be open
                    if in_first_block && !is_empty {
                        self.current_port = Some(PortBuilder {
                            portid: attribute(element, b"portid")?,
                            protocol: attribute(element, b"protocol")?,
                            ..PortBuilder::default()
                        });
                    }
                }
                ([_, "host", "ports", "port"], "state") => {
                    if let Some(port) = self.current_port.as_mut() {
                        if !port.state_seen {
                            port.state_seen = true;
                            port.state = attribute(element, b"state")?;
                        }
                    }
                }
                ([_, "host", "ports", "port"], "service") => {
                    if let Some(port) = self.current_port.as_mut() {
                        if !port.service_seen {
                            port.service_seen = true;
                            port.service = attribute(element, b"name")?;
                            port.product = attribute(element, b"product")?;
                            port.fingerprint = attribute(element, b"ostype")?;
                        }
                    }
                }
                ([_, "host", "ports", "port"], "script") => {
                    if let Some(port) = self.current_port.as_mut() {
                        port.scripts.push(ScriptResult {
                            id: attribute(element, b"id")?.unwrap_or_default(),
                            output: attribute(element, b"output")?.unwrap_or_default(),
                        });
                    }
                }
                _ => {}
            }
        }

        if !is_empty {
            self.stack.push(name);
        }
        Ok(())
    }

    /// Character data is never read but may only appear inside the root.
    fn text(&self, content: &str) -> Result<(), DocumentError> {
        if self.stack.is_empty() && !content.trim().is_empty() {
            return Err(DocumentError::StrayText(content.trim().to_string()));
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), DocumentError> {
        let Some(name) = self.stack.pop() else {
            return Ok(());
        };

        let parents: Vec<&str> = self.stack.iter().map(String::as_str).collect();
        match (parents.as_slice(), name.as_str()) {
            ([_, "host", "ports"], "port") => {
                if let (Some(host), Some(port)) =
                    (self.current_host.as_mut(), self.current_port.take())
                {
                    if let Some(raw) = port.build()? {
                        host.ports.push(raw);
                    }
                }
            }
            ([_], "host") => {
                if let Some(host) = self.current_host.take() {
                    if let Some(entry) = host.build() {
                        self.hosts.push(entry);
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn finish(self) -> Result<Vec<HostEntry>, DocumentError> {
        if let Some(open) = self.stack.last() {
            return Err(DocumentError::UnexpectedEof(open.clone()));
        }
        if !self.root_seen {
            return Err(DocumentError::NoRootElement);
        }
        Ok(self.hosts)
    }
}

/// Rejects unquoted, duplicated or badly escaped attributes on any element.
fn check_attributes(element: &BytesStart<'_>) -> Result<(), DocumentError> {
    for attr in element.attributes() {
        attr.map_err(|err| DocumentError::Xml(err.to_string()))?
            .unescape_value()
            .map_err(|err| DocumentError::Xml(err.to_string()))?;
    }
    Ok(())
}

fn attribute(element: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, DocumentError> {
    for attr in element.attributes() {
        let attr = attr.map_err(|err| DocumentError::Xml(err.to_string()))?;
        if attr.key.as_ref() == key {
            let value = attr
                .unescape_value()
                .map_err(|err| DocumentError::Xml(err.to_string()))?;
            return Ok(Some(value.to_string()));
        }
    }
    Ok(None)
}

#[derive(Default)]
struct HostBuilder {
    address_seen: bool,
    address: Option<String>,
    hostnames: Vec<String>,
    os_blocks: usize,
    os_guess: Option<String>,
    port_blocks: usize,
    ports: Vec<RawPort>,
}

impl HostBuilder {
    fn build(self) -> Option<HostEntry> {
        if self.port_blocks == 0 {
            return None;
        }
        Some(HostEntry {
            address: self.address.unwrap_or_else(|| "unknown".to_string()),
            hostnames: self.hostnames,
            os_guess: self.os_guess.unwrap_or_else(|| "unknown".to_string()),
            ports: self.ports,
        })
    }
}

#[derive(Default)]
struct PortBuilder {
    portid: Option<String>,
    protocol: Option<String>,
    state_seen: bool,
    state: Option<String>,
    service_seen: bool,
    service: Option<String>,
    product: Option<String>,
    fingerprint: Option<String>,
    scripts: Vec<ScriptResult>,
}

impl PortBuilder {
    fn build(self) -> Result<Option<RawPort>, DocumentError> {
        if self.state.as_deref() != Some("open") {
            return Ok(None);
        }

        let raw_id = self.portid.unwrap_or_default();
        let port = match raw_id.trim().parse::<u16>() {
            Ok(port) if port != 0 => port,
            _ => return Err(DocumentError::InvalidPort(raw_id)),
        };

        Ok(Some(RawPort {
            port,
            protocol: self.protocol.unwrap_or_else(|| "tcp".to_string()),
            service: self.service.unwrap_or_else(|| "unknown".to_string()),
            product: self.product,
            fingerprint: self.fingerprint,
            scripts: self.scripts,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE nmaprun>
<?xml-stylesheet href="file:///usr/share/nmap/nmap.xsl" type="text/xsl"?>
<nmaprun scanner="nmap" args="nmap -sV -O -oX scan.xml 10.0.0.0/24">
  <hosthint>
    <status state="up" reason="arp-response"/>
    <address addr="10.0.0.99" addrtype="ipv4"/>
  </hosthint>
  <host starttime="1700000000">
    <status state="up" reason="syn-ack"/>
    <address addr="10.0.0.5" addrtype="ipv4"/>
    <address addr="AA:BB:CC:DD:EE:FF" addrtype="mac" vendor="Acme"/>
    <hostnames>
      <hostname name="web01.corp" type="PTR"/>
      <hostname name="web01" type="user"/>
    </hostnames>
    <ports>
      <extraports state="closed" count="995"/>
      <port protocol="tcp" portid="22">
        <state state="open" reason="syn-ack"/>
        <service name="ssh" product="OpenSSH" version="8.9p1" ostype="Linux" method="probed"/>
      </port>
      <port protocol="tcp" portid="80">
        <state state="open" reason="syn-ack"/>
        <service name="http" product="nginx"/>
        <script id="http-title" output="Welcome"/>
        <script id="http-vuln-cve2017-5638" output="VULNERABLE:&#xa;  CVE-2017-5638">
          <table key="CVE-2017-5638"><elem key="state">VULNERABLE</elem></table>
        </script>
      </port>
      <port protocol="tcp" portid="443">
        <state state="closed" reason="reset"/>
        <service name="https"/>
      </port>
      <port protocol="udp" portid="161">
        <state state="open|filtered" reason="no-response"/>
      </port>
    </ports>
    <os>
      <osmatch name="Linux 5.4" accuracy="98"><osclass type="general purpose"/></osmatch>
      <osmatch name="Linux 4.15" accuracy="95"/>
    </os>
  </host>
  <host>
    <status state="up"/>
    <address addr="10.0.0.6" addrtype="ipv4"/>
  </host>
  <runstats><finished time="1700000100"/></runstats>
</nmaprun>
"#;

    #[test]
    fn parses_open_ports_and_metadata() {
        let hosts = parse_hosts(SAMPLE.as_bytes()).expect("sample should parse");
        assert_eq!(hosts.len(), 1, "host without ports block is dropped");

        let host = &hosts[0];
        assert_eq!(host.address, "10.0.0.5");
        assert_eq!(host.hostnames, vec!["web01.corp", "web01"]);
        assert_eq!(host.os_guess, "Linux 5.4");

        let ports: Vec<u16> = host.ports.iter().map(|port| port.port).collect();
        assert_eq!(ports, vec![22, 80]);

        let ssh = &host.ports[0];
        assert_eq!(ssh.protocol, "tcp");
        assert_eq!(ssh.service, "ssh");
        assert_eq!(ssh.product.as_deref(), Some("OpenSSH"));
        assert_eq!(ssh.fingerprint.as_deref(), Some("Linux"));
        assert!(ssh.last_script().is_none());
    }

    #[test]
    fn keeps_scripts_in_order_and_unescapes_output() {
        let hosts = parse_hosts(SAMPLE.as_bytes()).expect("sample should parse");
        let http = &hosts[0].ports[1];
        assert_eq!(http.scripts.len(), 2);
        assert_eq!(http.scripts[0].id, "http-title");

        let last = http.last_script().expect("script present");
        assert_eq!(last.id, "http-vuln-cve2017-5638");
        assert_eq!(last.output, "VULNERABLE:\n  CVE-2017-5638");
        assert_eq!(http.fingerprint, None);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let xml = r#"<nmaprun>
  <host>
    <ports>
      <port portid="9999"><state state="open"/></port>
    </ports>
  </host>
</nmaprun>"#;
        let hosts = parse_hosts(xml.as_bytes()).expect("should parse");
        let host = &hosts[0];
        assert_eq!(host.address, "unknown");
        assert!(host.hostnames.is_empty());
        assert_eq!(host.os_guess, "unknown");

        let port = &host.ports[0];
        assert_eq!(port.service, "unknown");
        assert_eq!(port.protocol, "tcp");
        assert_eq!(port.product, None);
    }

    #[test]
    fn closed_only_host_has_no_ports() {
        let xml = r#"<nmaprun><host><address addr="10.1.1.1"/><ports>
<port protocol="tcp" portid="22"><state state="closed"/></port>
<port protocol="tcp" portid="23"><state state="filtered"/></port>
</ports></host></nmaprun>"#;
        let hosts = parse_hosts(xml.as_bytes()).expect("should parse");
        assert_eq!(hosts.len(), 1);
        assert!(hosts[0].ports.is_empty());
    }

    #[test]
    fn malformed_documents_are_rejected() {
        assert!(matches!(
            parse_hosts(b"<nmaprun><host></nmaprun>"),
            Err(DocumentError::Xml(_))
        ));
        assert!(matches!(
            parse_hosts(b"<nmaprun><host>"),
            Err(DocumentError::UnexpectedEof(_)) | Err(DocumentError::Xml(_))
        ));
        assert_eq!(parse_hosts(b""), Err(DocumentError::NoRootElement));
        assert!(matches!(
            parse_hosts(b"<a/><b/>"),
            Err(DocumentError::TrailingContent(_))
        ));
    }

    fn open_port_document(host_attrs: &str, inner: &str, tail: &str) -> String {
        format!(
            r#"<nmaprun><host><address {host_attrs}/><hostnames>{inner}</hostnames><ports>
<port protocol="tcp" portid="22"><state state="open"/><service name="ssh"/></port>
</ports></host></nmaprun>{tail}"#
        )
    }

    #[test]
    fn well_formed_fixture_parses() {
        let xml = open_port_document(r#"addr="10.0.0.5""#, r#"<hostname name="x"/>"#, "\n");
        let hosts = parse_hosts(xml.as_bytes()).expect("well-formed document");
        assert_eq!(hosts[0].address, "10.0.0.5");
        assert_eq!(hosts[0].ports.len(), 1);
    }

    #[test]
    fn ill_formed_attributes_are_rejected() {
        let unquoted = open_port_document("addr=10.0.0.5", "", "");
        assert!(matches!(
            parse_hosts(unquoted.as_bytes()),
            Err(DocumentError::Xml(_))
        ));

        let duplicated = open_port_document(r#"addr="10.0.0.5" addr="10.0.0.6""#, "", "");
        assert!(matches!(
            parse_hosts(duplicated.as_bytes()),
            Err(DocumentError::Xml(_))
        ));

        // attributes that are never read are checked too
        let unused = open_port_document(r#"addr="10.0.0.5" vendor="A & B""#, "", "");
        assert!(matches!(
            parse_hosts(unused.as_bytes()),
            Err(DocumentError::Xml(_))
        ));
    }

    #[test]
    fn ill_formed_text_is_rejected() {
        let ampersand =
            open_port_document(r#"addr="10.0.0.5""#, r#"<hostname name="x"/>a & b"#, "");
        assert!(matches!(
            parse_hosts(ampersand.as_bytes()),
            Err(DocumentError::Xml(_))
        ));

        let undefined = open_port_document(r#"addr="10.0.0.5""#, "&bogus;", "");
        assert!(matches!(
            parse_hosts(undefined.as_bytes()),
            Err(DocumentError::Xml(_))
        ));

        let junk = open_port_document(r#"addr="10.0.0.5""#, "", "junk");
        assert_eq!(
            parse_hosts(junk.as_bytes()),
            Err(DocumentError::StrayText("junk".to_string()))
        );

        assert_eq!(
            parse_hosts(b"junk<nmaprun/>"),
            Err(DocumentError::StrayText("junk".to_string()))
        );
    }

    #[test]
    fn bad_port_id_on_open_port_fails_document() {
        let xml = r#"<nmaprun><host><ports>
<port protocol="tcp" portid="http"><state state="open"/></port>
</ports></host></nmaprun>"#;
        assert_eq!(
            parse_hosts(xml.as_bytes()),
            Err(DocumentError::InvalidPort("http".to_string()))
        );

        let closed = r#"<nmaprun><host><ports>
<port protocol="tcp" portid="http"><state state="closed"/></port>
</ports></host></nmaprun>"#;
        assert!(parse_hosts(closed.as_bytes()).is_ok());
    }

    #[test]
    fn load_document_records_name_and_timestamp() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("scan-a.xml");
        fs::write(&path, SAMPLE).expect("write fixture");

        let doc = load_document(&path).expect("document loads");
        assert_eq!(doc.name, "scan-a.xml");
        assert!(OffsetDateTime::parse(&doc.scanned_at, &Rfc3339).is_ok());
        assert_eq!(doc.hosts.len(), 1);
    }
}
