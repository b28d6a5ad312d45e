//! Join extracted bills with their page images.
//!
//! A bill whose page has no rendered image (out of range, render failure,
//! rendering disabled) is still returned, with `image: None`.

use crate::output::{BillData, ExtractResponse};
use crate::pipeline::encode;
use crate::workflow::PipelineState;

/// Address reported when the classifier found none.
pub const ADDRESS_NOT_FOUND: &str = "Address not found";

/// Build the caller-facing response from a finished pipeline state.
pub fn assemble(state: &PipelineState, file_name: &str) -> ExtractResponse {
    let bills = state
        .bills
        .iter()
        .map(|bill| BillData {
            file_name: file_name.to_string(),
            bill_no: bill.bill_no.clone(),
            start_date: bill.previous_date.into(),
            end_date: bill.current_date.into(),
            usage: bill.consumption,
            water: bill.total_bill,
            sewage: bill.sewage,
            bill_amount: bill.bill_amount(),
            image: state
                .page_images
                .get(&bill.page_no)
                .map(|png| encode::to_base64(png)),
        })
        .collect();

    ExtractResponse {
        address: state
            .address
            .clone()
            .unwrap_or_else(|| ADDRESS_NOT_FOUND.to_string()),
        bills,
        warnings: state.rejected.iter().map(ToString::to_string).collect(),
    }
}
