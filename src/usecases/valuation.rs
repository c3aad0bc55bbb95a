use crate::domain::models::{EnrichedHolding, Holding};
use crate::usecases::aggregate::percent_of;

/// Values a holding at `price`. Without a live price the holding is valued
/// at cost, so it shows zero gain rather than a missing value.
pub fn enrich(holding: Holding, price: Option<f64>) -> EnrichedHolding {
    let price = price
        .filter(|p| p.is_finite())
        .or_else(|| intrinsic_price(&holding));
    let total_cost = holding.total_cost();
    let current_value = match price {
        Some(p) => holding.quantity * p,
        None => total_cost,
    };
    let gain_loss = current_value - total_cost;

    EnrichedHolding {
        gain_loss_percent: percent_of(gain_loss, total_cost),
        current_price: price,
        current_value,
        total_cost,
        gain_loss,
        name: None,
        image: None,
        industry: None,
        holding,
    }
}

/// Price for holdings that are never quoted externally: cash and custom
/// assets are worth their recorded cost basis.
pub fn intrinsic_price(holding: &Holding) -> Option<f64> {
    if holding.asset_type.is_self_priced() {
        Some(holding.cost_basis)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::AssetType;

    fn holding(asset_type: AssetType, qty: f64, cost: f64) -> Holding {
        Holding {
            id: "h_1".to_string(),
            ticker: "T".to_string(),
            quantity: qty,
            cost_basis: cost,
            account_name: "Acct".to_string(),
            asset_type,
            underlying_ticker: None,
            strike_price: None,
            expiration_date: None,
            option_type: None,
            added_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn missing_price_falls_back_to_cost() {
        let e = enrich(holding(AssetType::Stock, 4.0, 25.0), None);
        assert_eq!(e.current_price, None);
        assert_eq!(e.current_value, 100.0);
        assert_eq!(e.gain_loss, 0.0);
        assert_eq!(e.gain_loss_percent, Some(0.0));
    }

    #[test]
    fn live_price_drives_value_and_gain() {
        let e = enrich(holding(AssetType::Crypto, 2.0, 100.0), Some(150.0));
        assert_eq!(e.current_value, 300.0);
        assert_eq!(e.total_cost, 200.0);
        assert_eq!(e.gain_loss, 100.0);
        assert_eq!(e.gain_loss_percent, Some(50.0));
    }

    #[test]
    fn cash_is_priced_at_cost_basis() {
        let e = enrich(holding(AssetType::Cash, 1.0, 5000.0), None);
        assert_eq!(e.current_price, Some(5000.0));
        assert_eq!(e.current_value, 5000.0);
    }

    #[test]
    fn non_finite_price_is_ignored() {
        let e = enrich(holding(AssetType::Stock, 1.0, 10.0), Some(f64::NAN));
        assert_eq!(e.current_price, None);
        assert_eq!(e.current_value, 10.0);
    }

    #[test]
    fn zero_cost_has_no_percent() {
        let e = enrich(holding(AssetType::Stock, 1.0, 0.0), Some(3.0));
        assert_eq!(e.gain_loss, 3.0);
        assert_eq!(e.gain_loss_percent, None);
    }
}
