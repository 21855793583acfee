// Balance tally: the ledger as a sorted table, optionally written as CSV.

use std::io::Write;
use serde::Serialize;

use crate::constants::SATS_PER_COIN;
use crate::error::LedgerResult;
use crate::ledger::LedgerStore;

pub const CSV_HEADER: [&str; 3] = ["address", "balance_sats", "balance_coins"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TallyRow {
    pub address: String,
    pub balance_sats: u64,
}

impl TallyRow {
    pub fn balance_coins(&self) -> String {
        format_coin_amount(self.balance_sats)
    }
}

/// Format satoshis as a coin amount with 8 fixed decimals
pub fn format_coin_amount(sats: u64) -> String {
    let whole = sats / SATS_PER_COIN;
    let frac = sats % SATS_PER_COIN;
    format!("{}.{:08}", whole, frac)
}

/// All ledger rows, largest balance first, ties broken by address
pub fn tally<L: LedgerStore + ?Sized>(ledger: &L) -> LedgerResult<Vec<TallyRow>> {
    let mut rows: Vec<TallyRow> = ledger
        .balances()?
        .into_iter()
        .map(|(address, balance_sats)| TallyRow {
            address,
            balance_sats,
        })
        .collect();

    rows.sort_by(|a, b| {
        b.balance_sats
            .cmp(&a.balance_sats)
            .then_with(|| a.address.cmp(&b.address))
    });
    Ok(rows)
}

/// One CSV line
#[derive(Serialize)]
struct TallyCsvEntry<'a> {
    address: &'a str,
    balance_sats: u64,
    balance_coins: String,
}

impl<'a> From<&'a TallyRow> for TallyCsvEntry<'a> {
    fn from(row: &'a TallyRow) -> Self {
        Self {
            address: &row.address,
            balance_sats: row.balance_sats,
            balance_coins: row.balance_coins(),
        }
    }
}

/// Header line, then one quoted-as-needed record per row
pub fn write_csv<W: Write>(writer: &mut W, rows: &[TallyRow]) -> LedgerResult<()> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false) // written explicitly so an empty tally still has one
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(writer);

    wtr.write_record(CSV_HEADER)?;
    for row in rows {
        wtr.serialize(TallyCsvEntry::from(row))?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;

    #[test]
    fn test_format_coin_amount() {
        assert_eq!(format_coin_amount(0), "0.00000000");
        assert_eq!(format_coin_amount(1), "0.00000001");
        assert_eq!(format_coin_amount(5_000_000_000), "50.00000000");
        assert_eq!(format_coin_amount(123_456_789), "1.23456789");
    }

    #[test]
    fn test_tally_sorted_by_balance_then_address() {
        let mut ledger = MemoryLedger::new();
        ledger.upsert("DCarol", 10).unwrap();
        ledger.upsert("DBob", 500).unwrap();
        ledger.upsert("DAlice", 10).unwrap();

        let rows = tally(&ledger).unwrap();
        let order: Vec<&str> = rows.iter().map(|r| r.address.as_str()).collect();
        assert_eq!(order, vec!["DBob", "DAlice", "DCarol"]);
    }

    #[test]
    fn test_write_csv() {
        let rows = vec![
            TallyRow {
                address: "DBob".to_string(),
                balance_sats: 5_000_000_000,
            },
            TallyRow {
                address: "DAlice".to_string(),
                balance_sats: 1,
            },
        ];

        let mut out = Vec::new();
        write_csv(&mut out, &rows).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert_eq!(
            text,
            "address,balance_sats,balance_coins\nDBob,5000000000,50.00000000\nDAlice,1,0.00000001\n"
        );
    }

    #[test]
    fn test_empty_ledger_writes_header_only() {
        let rows = tally(&MemoryLedger::new()).unwrap();
        let mut out = Vec::new();
        write_csv(&mut out, &rows).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "address,balance_sats,balance_coins\n");
    }

    #[test]
    fn test_write_csv_quotes_awkward_addresses() {
        let rows = vec![TallyRow {
            address: "unknown,\"x\"".to_string(),
            balance_sats: 100_000_000,
        }];

        let mut out = Vec::new();
        write_csv(&mut out, &rows).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "address,balance_sats,balance_coins\n\"unknown,\"\"x\"\"\",100000000,1.00000000\n"
        );

        let mut reader = csv::Reader::from_reader(text.as_bytes());
        let records: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].len(), 3);
        assert_eq!(&records[0][0], "unknown,\"x\"");
    }
}
