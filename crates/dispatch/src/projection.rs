//! Flat field projections for template rendering. The template engine that
//! consumes these maps lives outside this crate; the contract here is a
//! stable key set where every missing related entity degrades to null
//! instead of failing.

use crate::model::Dispatch;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Party {
    pub identity_document_type_id: Option<String>,
    pub number: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub identity_document_type_id: Option<String>,
    pub number: Option<String>,
    pub name: Option<String>,
    pub license: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dispatcher {
    pub identity_document_type_id: Option<String>,
    pub number: Option<String>,
    pub name: Option<String>,
    pub number_mtc: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Address {
    pub location_id: Option<String>,
    pub address: Option<String>,
    pub code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportData {
    pub plate_number: Option<String>,
    pub tuc: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemLine {
    pub internal_id: Option<String>,
    pub name: String,
    pub unit_type_id: String,
    pub quantity: f64,
}

/// The dispatch aggregate with its related entities, as loaded by the
/// caller. Every relation is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchDetails {
    pub dispatch: Dispatch,
    pub company_name: String,
    pub company_number: String,
    pub company_trade_name: Option<String>,
    pub date_of_issue: String,
    pub date_of_shipping: String,
    pub transfer_reason_type_id: Option<String>,
    pub unit_type_id: String,
    pub total_weight: f64,
    pub packages_number: Option<u32>,
    pub observations: Option<String>,
    pub customer: Option<Party>,
    pub driver: Option<Driver>,
    pub dispatcher: Option<Dispatcher>,
    pub origin: Option<Address>,
    pub delivery: Option<Address>,
    pub transport: Option<TransportData>,
    pub items: Vec<ItemLine>,
}

fn items_value(items: &[ItemLine]) -> Value {
    items
        .iter()
        .map(|it| {
            json!({
                "internal_id": it.internal_id,
                "name": it.name,
                "unit_type_id": it.unit_type_id,
                "quantity": it.quantity,
            })
        })
        .collect()
}

/// Field set for the regular dispatch template.
pub fn document_data(d: &DispatchDetails) -> Value {
    json!({
        "company_name": d.company_name,
        "company_number": d.company_number,
        "company_trade_name": d.company_trade_name,
        "document_type_id": d.dispatch.document_type_id,
        "series": d.dispatch.series,
        "number": d.dispatch.number,
        "filename": d.dispatch.filename,
        "date_of_issue": d.date_of_issue,
        "date_of_shipping": d.date_of_shipping,
        "transfer_reason_type_id": d.transfer_reason_type_id,
        "unit_type_id": d.unit_type_id,
        "total_weight": d.total_weight,
        "packages_number": d.packages_number,
        "observations": d.observations,
        "customer_identity_document_type_id": d.customer.as_ref().and_then(|c| c.identity_document_type_id.clone()),
        "customer_number": d.customer.as_ref().and_then(|c| c.number.clone()),
        "customer_name": d.customer.as_ref().and_then(|c| c.name.clone()),
        "driver_identity_document_type_id": d.driver.as_ref().and_then(|x| x.identity_document_type_id.clone()),
        "driver_number": d.driver.as_ref().and_then(|x| x.number.clone()),
        "driver_names": d.driver.as_ref().and_then(|x| x.name.clone()),
        "driver_license": d.driver.as_ref().and_then(|x| x.license.clone()),
        "dispatcher_identity_document_type_id": d.dispatcher.as_ref().and_then(|x| x.identity_document_type_id.clone()),
        "dispatcher_number": d.dispatcher.as_ref().and_then(|x| x.number.clone()),
        "dispatcher_name": d.dispatcher.as_ref().and_then(|x| x.name.clone()),
        "dispatcher_number_mtc": d.dispatcher.as_ref().and_then(|x| x.number_mtc.clone()),
        "origin_location_id": d.origin.as_ref().and_then(|x| x.location_id.clone()),
        "origin_address": d.origin.as_ref().and_then(|x| x.address.clone()),
        "origin_code": d.origin.as_ref().and_then(|x| x.code.clone()),
        "delivery_location_id": d.delivery.as_ref().and_then(|x| x.location_id.clone()),
        "delivery_address": d.delivery.as_ref().and_then(|x| x.address.clone()),
        "delivery_code": d.delivery.as_ref().and_then(|x| x.code.clone()),
        "transport_plate_number": d.transport.as_ref().and_then(|x| x.plate_number.clone()),
        "transport_tuc": d.transport.as_ref().and_then(|x| x.tuc.clone()),
        "items": items_value(&d.items),
    })
}

/// Reduced field set for the carrier-issued template: no customer,
/// dispatcher or route addresses.
pub fn carrier_data(d: &DispatchDetails) -> Value {
    json!({
        "company_name": d.company_name,
        "company_number": d.company_number,
        "company_trade_name": d.company_trade_name,
        "document_type_id": d.dispatch.document_type_id,
        "series": d.dispatch.series,
        "number": d.dispatch.number,
        "filename": d.dispatch.filename,
        "date_of_issue": d.date_of_issue,
        "date_of_shipping": d.date_of_shipping,
        "unit_type_id": d.unit_type_id,
        "total_weight": d.total_weight,
        "observations": d.observations,
        "driver_identity_document_type_id": d.driver.as_ref().and_then(|x| x.identity_document_type_id.clone()),
        "driver_number": d.driver.as_ref().and_then(|x| x.number.clone()),
        "driver_names": d.driver.as_ref().and_then(|x| x.name.clone()),
        "driver_license": d.driver.as_ref().and_then(|x| x.license.clone()),
        "transport_plate_number": d.transport.as_ref().and_then(|x| x.plate_number.clone()),
        "transport_tuc": d.transport.as_ref().and_then(|x| x.tuc.clone()),
        "items": items_value(&d.items),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gre_core::DispatchState;

    fn bare_details() -> DispatchDetails {
        DispatchDetails {
            dispatch: Dispatch {
                id: 1,
                external_id: "ext-1".into(),
                document_type_id: "09".into(),
                series: "T001".into(),
                number: 5,
                filename: "20601234567-09-T001-5".into(),
                ticket: None,
                reception_date: None,
                state: DispatchState::Pending,
                has_cdr: false,
                qr_url: None,
            },
            company_name: "ACME SAC".into(),
            company_number: "20601234567".into(),
            company_trade_name: None,
            date_of_issue: "2026-08-30".into(),
            date_of_shipping: "2026-08-31".into(),
            transfer_reason_type_id: Some("01".into()),
            unit_type_id: "KGM".into(),
            total_weight: 120.5,
            packages_number: None,
            observations: None,
            customer: None,
            driver: None,
            dispatcher: None,
            origin: None,
            delivery: None,
            transport: None,
            items: vec![ItemLine {
                internal_id: None,
                name: "Cemento".into(),
                unit_type_id: "BG".into(),
                quantity: 10.0,
            }],
        }
    }

    #[test]
    fn missing_relations_project_as_null() {
        let data = document_data(&bare_details());
        assert!(data["customer_name"].is_null());
        assert!(data["driver_license"].is_null());
        assert!(data["origin_address"].is_null());
        assert_eq!(data["company_name"], "ACME SAC");
        assert_eq!(data["items"][0]["name"], "Cemento");
        assert!(data["items"][0]["internal_id"].is_null());
    }

    #[test]
    fn carrier_projection_drops_customer_fields() {
        let data = carrier_data(&bare_details());
        assert!(data.get("customer_name").is_none());
        assert!(data.get("dispatcher_number").is_none());
        assert_eq!(data["total_weight"], 120.5);
    }
}
