use crate::model::ServiceCategory;

const PORT_TABLE: &[(ServiceCategory, &[u16])] = &[
    (ServiceCategory::Web, &[80, 8080, 8000, 443, 8443]),
    (ServiceCategory::Ssh, &[22]),
    (ServiceCategory::Ftp, &[21]),
    (ServiceCategory::Rdp, &[3389]),
    (ServiceCategory::Dns, &[53]),
    (ServiceCategory::Smtp, &[25, 465, 587]),
    (ServiceCategory::Pop3, &[110, 995]),
    (ServiceCategory::Imap, &[143, 993]),
    (
        ServiceCategory::Db,
        &[1433, 1521, 3306, 5432, 6379, 9200, 27017],
    ),
    (ServiceCategory::FileSharing, &[139, 445]),
    (ServiceCategory::Vpn, &[1194, 500]),
];

// Evaluated top to bottom; dns has no name rule.
const NAME_RULES: &[(&[&str], ServiceCategory)] = &[
    (&["http", "web"], ServiceCategory::Web),
    (&["ssh"], ServiceCategory::Ssh),
    (&["ftp"], ServiceCategory::Ftp),
    (&["rdp"], ServiceCategory::Rdp),
    (&["smtp", "mail"], ServiceCategory::Smtp),
    (&["pop3"], ServiceCategory::Pop3),
    (&["imap"], ServiceCategory::Imap),
    (
        &["mysql", "mssql", "postgres", "mongo", "redis"],
        ServiceCategory::Db,
    ),
    (&["smb", "netbios"], ServiceCategory::FileSharing),
    (&["vpn"], ServiceCategory::Vpn),
];

/// Maps a port and its reported service name to a coarse category.
///
/// The well-known port table wins over the service name; the name is only
/// consulted for ports outside the table. Never fails: anything unmatched
/// is [`ServiceCategory::Misc`].
pub fn classify(port: u16, service_name: &str) -> ServiceCategory {
    if let Some(category) = category_for_port(port) {
        return category;
    }

    let name = service_name.to_lowercase();
    NAME_RULES
        .iter()
        .find(|(needles, _)| needles.iter().any(|needle| name.contains(needle)))
        .map(|(_, category)| *category)
        .unwrap_or(ServiceCategory::Misc)
}

pub fn category_for_port(port: u16) -> Option<ServiceCategory> {
    PORT_TABLE
        .iter()
        .find(|(_, ports)| ports.contains(&port))
        .map(|(category, _)| *category)
}
