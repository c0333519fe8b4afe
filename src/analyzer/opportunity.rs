use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;

use crate::types::{Constraints, Item, Opportunity, Order, OrderSide};

/// Why an item's order book produced no opportunity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// No buy orders or no sell orders at all.
    OneSided,
    /// Undercutting the ask and outbidding the bid leaves no spread.
    NoSpread { buy: i64, sell: i64 },
    /// Best bid is older than the allowed age, or its age is unknown.
    StaleBid,
    BelowMinProfit { profit: i64 },
    OverInvestment { buy: i64 },
    /// Quoted prices too extreme to step by one or subtract.
    PriceOutOfRange { bid: i64, ask: i64 },
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::OneSided => write!(f, "one-sided book"),
            Rejection::NoSpread { buy, sell } => write!(f, "no spread (sell {sell} <= buy {buy})"),
            Rejection::StaleBid => write!(f, "best bid too old"),
            Rejection::BelowMinProfit { profit } => write!(f, "profit {profit} below minimum"),
            Rejection::OverInvestment { buy } => write!(f, "buy price {buy} over investment cap"),
            Rejection::PriceOutOfRange { bid, ask } => {
                write!(f, "prices out of range (bid {bid}, ask {ask})")
            }
        }
    }
}

/// Buy from the best bidder's side by outbidding it by one, resell by undercutting
/// the best ask by one. `now` is injected so the result depends only on the inputs.
pub fn evaluate(
    item: &Item,
    orders: &[Order],
    constraints: &Constraints,
    now: DateTime<Utc>,
) -> Result<Opportunity, Rejection> {
    // Ties keep the first order encountered.
    let best_ask = orders
        .iter()
        .filter(|o| o.side == OrderSide::Sell)
        .reduce(|best, o| if o.price < best.price { o } else { best });
    let best_bid = orders
        .iter()
        .filter(|o| o.side == OrderSide::Buy)
        .reduce(|best, o| if o.price > best.price { o } else { best });
    let (Some(best_ask), Some(best_bid)) = (best_ask, best_bid) else {
        return Err(Rejection::OneSided);
    };

    let out_of_range = Rejection::PriceOutOfRange {
        bid: best_bid.price,
        ask: best_ask.price,
    };
    let (Some(buy), Some(sell)) = (best_bid.price.checked_add(1), best_ask.price.checked_sub(1))
    else {
        return Err(out_of_range);
    };
    if sell <= buy {
        return Err(Rejection::NoSpread { buy, sell });
    }

    let max_age = TimeDelta::days(i64::from(constraints.max_order_age_days));
    match best_bid.creation_date {
        Some(created) if now.signed_duration_since(created) <= max_age => {}
        _ => return Err(Rejection::StaleBid),
    }

    let profit = sell.checked_sub(buy).ok_or(out_of_range)?;
    if profit < constraints.min_profit {
        return Err(Rejection::BelowMinProfit { profit });
    }
    if constraints.max_investment != 0 && buy > constraints.max_investment {
        return Err(Rejection::OverInvestment { buy });
    }

    Ok(Opportunity {
        item_name: item.display_name.clone(),
        item_id: item.id.clone(),
        buy_price: buy,
        sell_price: sell,
        net_profit: profit,
        total_investment: buy,
        anchor_order: best_bid.clone(),
    })
}

/// [`evaluate`] with the rejection reason logged and discarded.
pub fn find_opportunity(
    item: &Item,
    orders: &[Order],
    constraints: &Constraints,
    now: DateTime<Utc>,
) -> Option<Opportunity> {
    match evaluate(item, orders, constraints, now) {
        Ok(opp) => {
            debug!(
                "[ANALYZE] {}: buy {} sell {} profit {}",
                item.display_name, opp.buy_price, opp.sell_price, opp.net_profit
            );
            Some(opp)
        }
        Err(reason) => {
            debug!("[ANALYZE] {}: {reason}", item.display_name);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderUser, PosterStatus};

    fn item() -> Item {
        Item {
            id: "item1".to_string(),
            display_name: "Ash Prime Set".to_string(),
            lookup_slug: "ash_prime_set".to_string(),
        }
    }

    fn order(id: &str, side: OrderSide, price: i64, created: Option<DateTime<Utc>>) -> Order {
        Order {
            id: id.to_string(),
            side,
            price,
            quantity: 1,
            creation_date: created,
            user: OrderUser {
                ingame_name: "seller".to_string(),
                status: PosterStatus::Ingame,
            },
        }
    }

    fn constraints(min_profit: i64, max_investment: i64, max_order_age_days: u32) -> Constraints {
        Constraints {
            min_profit,
            max_investment,
            max_order_age_days,
            batch_size: 3,
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-03-10T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn recent() -> Option<DateTime<Utc>> {
        Some(now() - TimeDelta::hours(1))
    }

    fn scenario_orders() -> Vec<Order> {
        vec![
            order("s", OrderSide::Sell, 20, recent()),
            order("b", OrderSide::Buy, 10, recent()),
        ]
    }

    #[test]
    fn profitable_spread_yields_opportunity() {
        let opp = find_opportunity(&item(), &scenario_orders(), &constraints(5, 0, 30), now())
            .expect("expected an opportunity");
        assert_eq!(opp.buy_price, 11);
        assert_eq!(opp.sell_price, 19);
        assert_eq!(opp.net_profit, 8);
        assert_eq!(opp.total_investment, 11);
        assert_eq!(opp.anchor_order.id, "b");
        assert_eq!(opp.item_name, "Ash Prime Set");
    }

    #[test]
    fn profit_below_minimum_is_rejected() {
        let result = evaluate(&item(), &scenario_orders(), &constraints(20, 0, 30), now());
        assert_eq!(result, Err(Rejection::BelowMinProfit { profit: 8 }));
    }

    #[test]
    fn profit_exactly_at_minimum_is_accepted() {
        assert!(find_opportunity(&item(), &scenario_orders(), &constraints(8, 0, 30), now()).is_some());
    }

    #[test]
    fn stale_best_bid_is_rejected_regardless_of_profit() {
        let orders = vec![
            order("s", OrderSide::Sell, 500, recent()),
            order("b", OrderSide::Buy, 10, Some(now() - TimeDelta::days(2))),
        ];
        assert_eq!(
            evaluate(&item(), &orders, &constraints(0, 0, 1), now()),
            Err(Rejection::StaleBid)
        );
    }

    #[test]
    fn bid_exactly_at_max_age_is_accepted() {
        let orders = vec![
            order("s", OrderSide::Sell, 20, recent()),
            order("b", OrderSide::Buy, 10, Some(now() - TimeDelta::days(1))),
        ];
        assert!(find_opportunity(&item(), &orders, &constraints(0, 0, 1), now()).is_some());
    }

    #[test]
    fn missing_timestamp_counts_as_infinitely_old() {
        let orders = vec![
            order("s", OrderSide::Sell, 20, recent()),
            order("b", OrderSide::Buy, 10, None),
        ];
        assert_eq!(
            evaluate(&item(), &orders, &constraints(0, 0, u32::MAX), now()),
            Err(Rejection::StaleBid)
        );
    }

    #[test]
    fn one_sided_books_yield_nothing() {
        let sells = vec![order("s", OrderSide::Sell, 20, recent())];
        let buys = vec![order("b", OrderSide::Buy, 10, recent())];
        assert_eq!(evaluate(&item(), &sells, &constraints(0, 0, 30), now()), Err(Rejection::OneSided));
        assert_eq!(evaluate(&item(), &buys, &constraints(0, 0, 30), now()), Err(Rejection::OneSided));
        assert_eq!(evaluate(&item(), &[], &constraints(0, 0, 30), now()), Err(Rejection::OneSided));
    }

    #[test]
    fn touching_prices_have_no_spread() {
        // 12 - 1 = 11 = 10 + 1
        let orders = vec![
            order("s", OrderSide::Sell, 12, recent()),
            order("b", OrderSide::Buy, 10, recent()),
        ];
        assert_eq!(
            evaluate(&item(), &orders, &constraints(i64::MIN, 0, 30), now()),
            Err(Rejection::NoSpread { buy: 11, sell: 11 })
        );
    }

    #[test]
    fn investment_cap_applies_only_when_nonzero() {
        let orders = scenario_orders();
        assert_eq!(
            evaluate(&item(), &orders, &constraints(0, 10, 30), now()),
            Err(Rejection::OverInvestment { buy: 11 })
        );
        assert!(find_opportunity(&item(), &orders, &constraints(0, 11, 30), now()).is_some());
        assert!(find_opportunity(&item(), &orders, &constraints(0, 0, 30), now()).is_some());
    }

    #[test]
    fn best_prices_picked_across_many_orders() {
        let orders = vec![
            order("s1", OrderSide::Sell, 40, recent()),
            order("b1", OrderSide::Buy, 5, recent()),
            order("s2", OrderSide::Sell, 31, recent()),
            order("b2", OrderSide::Buy, 14, recent()),
            order("s3", OrderSide::Sell, 35, recent()),
        ];
        let opp = find_opportunity(&item(), &orders, &constraints(0, 0, 30), now()).unwrap();
        assert_eq!((opp.buy_price, opp.sell_price, opp.net_profit), (15, 30, 15));
        assert_eq!(opp.anchor_order.id, "b2");
    }

    #[test]
    fn equal_best_bids_anchor_on_first_encountered() {
        let orders = vec![
            order("s", OrderSide::Sell, 50, recent()),
            order("first", OrderSide::Buy, 10, recent()),
            order("second", OrderSide::Buy, 10, Some(now() - TimeDelta::days(40))),
        ];
        let opp = find_opportunity(&item(), &orders, &constraints(0, 0, 30), now()).unwrap();
        assert_eq!(opp.anchor_order.id, "first");
    }

    #[test]
    fn extreme_prices_are_rejected_not_overflowed() {
        let huge_bid = vec![
            order("s", OrderSide::Sell, 20, recent()),
            order("b", OrderSide::Buy, i64::MAX, recent()),
        ];
        assert_eq!(
            evaluate(&item(), &huge_bid, &constraints(0, 0, 30), now()),
            Err(Rejection::PriceOutOfRange { bid: i64::MAX, ask: 20 })
        );

        let tiny_ask = vec![
            order("s", OrderSide::Sell, i64::MIN, recent()),
            order("b", OrderSide::Buy, 10, recent()),
        ];
        assert!(find_opportunity(&item(), &tiny_ask, &constraints(0, 0, 30), now()).is_none());

        // Both ends valid on their own, but the spread does not fit in an i64.
        let wide = vec![
            order("s", OrderSide::Sell, i64::MAX, recent()),
            order("b", OrderSide::Buy, i64::MIN + 5, recent()),
        ];
        assert_eq!(
            evaluate(&item(), &wide, &constraints(0, 0, 30), now()),
            Err(Rejection::PriceOutOfRange { bid: i64::MIN + 5, ask: i64::MAX })
        );
    }

    #[test]
    fn repeated_evaluation_is_identical() {
        let orders = scenario_orders();
        let c = constraints(5, 0, 30);
        assert_eq!(
            find_opportunity(&item(), &orders, &c, now()),
            find_opportunity(&item(), &orders, &c, now())
        );
    }

    #[test]
    fn result_matches_closed_form_over_a_price_grid() {
        let c = constraints(3, 25, 30);
        for ask in 1..40 {
            for bid in 1..40 {
                let orders = vec![
                    order("s", OrderSide::Sell, ask, recent()),
                    order("b", OrderSide::Buy, bid, recent()),
                ];
                let expected = (ask - 1) - (bid + 1) >= c.min_profit
                    && (ask - 1) > (bid + 1)
                    && bid + 1 <= c.max_investment;
                assert_eq!(
                    find_opportunity(&item(), &orders, &c, now()).is_some(),
                    expected,
                    "ask={ask} bid={bid}"
                );
            }
        }
    }
}
