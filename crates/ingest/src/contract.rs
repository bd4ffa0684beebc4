//! Data contract for tenant CSV exports.
//!
//! Each ingestable table declares its required and optional columns
//! explicitly. A missing required column is a blocking error (the loader
//! refuses to promote the table); a missing optional column is a warning.

/// A required column, possibly satisfiable by one of several alternatives
/// (sales accept `product_key` or a resolvable `product_label`).
#[derive(Debug, Clone, Copy)]
pub enum RequiredColumn {
    One(&'static str),
    AnyOf(&'static [&'static str]),
}

impl RequiredColumn {
    pub fn is_satisfied(&self, headers: &[String]) -> bool {
        match self {
            RequiredColumn::One(name) => headers.iter().any(|h| h == name),
            RequiredColumn::AnyOf(names) => names
                .iter()
                .any(|name| headers.iter().any(|h| h == name)),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            RequiredColumn::One(name) => (*name).to_string(),
            RequiredColumn::AnyOf(names) => names.join("/"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TableContract {
    pub table: &'static str,
    pub required: &'static [RequiredColumn],
    pub optional: &'static [&'static str],
}

impl TableContract {
    /// Validates normalized headers. Returns `(errors, warnings)` with
    /// messages prefixed by the table name, as surfaced in the report.
    pub fn validate(&self, headers: &[String]) -> (Vec<String>, Vec<String>) {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        for required in self.required {
            if !required.is_satisfied(headers) {
                errors.push(format!(
                    "{}: missing required column: {}",
                    self.table,
                    required.describe()
                ));
            }
        }
        for optional in self.optional {
            if !headers.iter().any(|h| h == optional) {
                warnings.push(format!(
                    "{}: missing optional column: {}",
                    self.table, optional
                ));
            }
        }
        (errors, warnings)
    }
}

const CLIENTS: TableContract = TableContract {
    table: "clients",
    required: &[RequiredColumn::One("client_code")],
    optional: &["name", "email", "budget_band", "rfm_segment"],
};

const PRODUCTS: TableContract = TableContract {
    table: "products",
    required: &[
        RequiredColumn::One("product_key"),
        RequiredColumn::One("name"),
    ],
    optional: &["family_crm", "price_ttc", "global_popularity_score"],
};

const SALES: TableContract = TableContract {
    table: "sales",
    required: &[
        RequiredColumn::One("document_id"),
        RequiredColumn::AnyOf(&["product_key", "product_label"]),
        RequiredColumn::One("client_code"),
        RequiredColumn::One("quantity"),
        RequiredColumn::One("amount"),
        RequiredColumn::One("sale_date"),
    ],
    optional: &["currency", "channel"],
};

pub fn contract_for(table: &str) -> Option<&'static TableContract> {
    match table {
        "clients" => Some(&CLIENTS),
        "products" => Some(&PRODUCTS),
        "sales" => Some(&SALES),
        _ => None,
    }
}

/// Routes a file stem to its target table. French stems from the source
/// exports are recognized alongside the English ones.
pub fn table_for_stem(stem: &str) -> Option<&'static str> {
    let stem = stem.to_lowercase();
    if stem.contains("vente") || stem.contains("sale") {
        Some("sales")
    } else if stem.contains("client") {
        Some("clients")
    } else if stem.contains("produit") || stem.contains("product") {
        Some("products")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn sales_accept_label_in_place_of_key() {
        let contract = contract_for("sales").unwrap();
        let (errors, _) = contract.validate(&headers(&[
            "document_id",
            "product_label",
            "client_code",
            "quantity",
            "amount",
            "sale_date",
        ]));
        assert!(errors.is_empty());
    }

    #[test]
    fn missing_required_is_blocking_missing_optional_is_warning() {
        let contract = contract_for("clients").unwrap();
        let (errors, warnings) = contract.validate(&headers(&["name", "email"]));
        assert_eq!(errors, vec!["clients: missing required column: client_code"]);
        assert!(warnings.iter().any(|w| w.contains("budget_band")));
    }

    #[test]
    fn stems_route_french_and_english_names() {
        assert_eq!(table_for_stem("ventes_2024"), Some("sales"));
        assert_eq!(table_for_stem("Sales_Export"), Some("sales"));
        assert_eq!(table_for_stem("produits"), Some("products"));
        assert_eq!(table_for_stem("clients_isavigne"), Some("clients"));
        assert_eq!(table_for_stem("inventory"), None);
    }
}
