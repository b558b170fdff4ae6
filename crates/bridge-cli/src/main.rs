// Bridge CLI - operator client for the Bridge ledger API

mod client;
mod profile;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use serde_json::{json, Value};
use uuid::Uuid;

use client::ApiClient;
use profile::Profile;

/// Bridge - wallets, escrow and installment plans from the terminal
#[derive(Parser)]
#[command(name = "bridge")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Server base URL (overrides the saved profile)
    #[arg(long, global = true, env = "BRIDGE_SERVER")]
    server: Option<String>,

    /// Acting user id (overrides the saved profile)
    #[arg(long, global = true, env = "BRIDGE_USER_ID")]
    user: Option<Uuid>,

    /// Acting role, forwarded as X-User-Role
    #[arg(long, global = true, env = "BRIDGE_USER_ROLE")]
    role: Option<String>,

    /// Idempotency key for retry-safe mutations
    #[arg(long, global = true, value_name = "KEY")]
    idempotency_key: Option<String>,

    /// Profile file (defaults to ~/.bridge/profile.json)
    #[arg(long, global = true, env = "BRIDGE_PROFILE")]
    profile: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the saved connection profile
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },
    /// Wallet deposits, transfers, withdrawals and balances
    Wallet {
        #[command(subcommand)]
        action: WalletAction,
    },
    /// Create, inspect and pay orders
    Order {
        #[command(subcommand)]
        action: OrderAction,
    },
    /// Move an escrow order through its lifecycle
    Escrow {
        /// Order id
        order: Uuid,

        #[command(subcommand)]
        action: EscrowAction,
    },
    /// Installment plans
    Plan {
        #[command(subcommand)]
        action: PlanAction,
    },
    /// Quote or post platform fees
    Fees {
        #[command(subcommand)]
        action: FeesAction,
    },
}

#[derive(Subcommand)]
enum ProfileAction {
    /// Save --server, --user and --role into the profile
    Set,
    /// Show the effective profile
    Show,
}

#[derive(Subcommand)]
enum WalletAction {
    /// Record funds received from a rail (admin only)
    Deposit {
        amount: String,

        /// Wallet owner to credit (defaults to the acting user)
        #[arg(long, value_name = "USER")]
        to: Option<Uuid>,

        #[arg(short, long, default_value = "KES")]
        currency: String,

        /// Funding source label (e.g. mpesa)
        #[arg(long)]
        source: Option<String>,
    },
    /// Send funds to another user's wallet
    Transfer {
        /// Recipient user id
        recipient: Uuid,

        amount: String,

        #[arg(short, long, default_value = "KES")]
        currency: String,

        #[arg(long)]
        narration: Option<String>,

        /// Client reference, unique per sender
        #[arg(long = "ref", value_name = "REF")]
        client_ref: Option<String>,
    },
    /// Pay funds out of the acting user's wallet
    Withdraw {
        amount: String,

        #[arg(short, long, default_value = "KES")]
        currency: String,

        /// Payout rail (e.g. mpesa)
        #[arg(long)]
        method: Option<String>,

        /// Phone number or account receiving the payout
        #[arg(long)]
        destination: Option<String>,
    },
    /// Show balance and recent entries
    Balance {
        #[arg(default_value = "KES")]
        currency: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Direct,
    Escrow,
    Installment,
}

impl ModeArg {
    fn as_str(self) -> &'static str {
        match self {
            ModeArg::Direct => "DIRECT",
            ModeArg::Escrow => "ESCROW",
            ModeArg::Installment => "INSTALLMENT",
        }
    }
}

#[derive(Subcommand)]
enum OrderAction {
    /// Create a pending order as the customer
    Create {
        /// Merchant user id
        #[arg(long)]
        merchant: Uuid,

        amount: String,

        #[arg(short, long, default_value = "KES")]
        currency: String,

        #[arg(long, value_enum, default_value = "direct")]
        mode: ModeArg,
    },
    /// Show an order
    Show { id: Uuid },
    /// Pay a DIRECT order from the customer wallet
    PayNow { id: Uuid },
}

#[derive(Subcommand)]
enum EscrowAction {
    /// Hold the order amount in escrow
    Fund {
        /// Condition recorded on the hold
        #[arg(long, default_value = "")]
        condition: String,
    },
    /// Release held funds to the merchant
    Release,
    /// Return held funds to the customer
    Cancel,
    /// Refund a held escrow to the customer
    Refund,
}

#[derive(Clone, Copy, ValueEnum)]
enum PlanModeArg {
    PayAfter,
    DeliverThenCollect,
}

impl PlanModeArg {
    fn as_str(self) -> &'static str {
        match self {
            PlanModeArg::PayAfter => "INSTALLMENT_PAY_AFTER",
            PlanModeArg::DeliverThenCollect => "DELIVER_THEN_COLLECT",
        }
    }
}

#[derive(Subcommand)]
enum PlanAction {
    /// Create a plan for an INSTALLMENT order
    Create {
        /// Order id
        order: Uuid,

        /// Leg amounts, comma separated (must sum to the order amount)
        #[arg(long, value_delimiter = ',', required = true)]
        schedule: Vec<String>,

        #[arg(long, value_enum, default_value = "pay-after")]
        mode: PlanModeArg,
    },
    /// Pay one leg of a plan
    Pay {
        plan: Uuid,

        /// Zero-based leg index
        index: i64,
    },
    /// Show a plan and its legs
    Show { plan: Uuid },
}

#[derive(Subcommand)]
enum FeesAction {
    /// Quote fees without posting anything
    Quote {
        /// Transaction type (e.g. MERCHANT_PAYMENT)
        applies_to: String,

        amount: String,

        #[arg(short, long, default_value = "KES")]
        currency: String,

        #[arg(long)]
        merchant: Option<Uuid>,
    },
    /// Post fees for an external transaction (admin only)
    Apply {
        transaction_type: String,

        transaction_id: String,

        amount: String,

        #[arg(short, long, default_value = "KES")]
        currency: String,

        #[arg(long)]
        merchant: Option<Uuid>,

        /// Wallet charged for customer-paid fees
        #[arg(long)]
        customer_wallet: Option<Uuid>,

        /// Wallet charged for merchant-paid fees
        #[arg(long)]
        merchant_wallet: Option<Uuid>,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("{} {}", "✗".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let profile_path = match cli.profile {
        Some(path) => path,
        None => profile::default_path()?,
    };

    if let Commands::Profile { action } = cli.command {
        return handle_profile(action, &profile_path, cli.server, cli.user, cli.role);
    }

    let effective = profile::load(&profile_path)?.with_overrides(cli.server, cli.user, cli.role);
    let client = ApiClient::new(&effective, cli.idempotency_key)?;

    match cli.command {
        Commands::Profile { .. } => Ok(()),
        Commands::Wallet { action } => handle_wallet(&client, action),
        Commands::Order { action } => handle_order(&client, action),
        Commands::Escrow { order, action } => handle_escrow(&client, order, action),
        Commands::Plan { action } => handle_plan(&client, action),
        Commands::Fees { action } => handle_fees(&client, action),
    }
}

fn handle_profile(
    action: ProfileAction,
    path: &std::path::Path,
    server: Option<String>,
    user: Option<Uuid>,
    role: Option<String>,
) -> Result<()> {
    match action {
        ProfileAction::Set => {
            let updated = profile::load(path)?.with_overrides(server, user, role);
            profile::save(path, &updated)?;
            println!("{} {}", "✓".green().bold(), "Profile saved".green());
            print_profile(&updated);
            println!("  File:    {}", path.display());
        }
        ProfileAction::Show => {
            let effective = profile::load(path)?.with_overrides(server, user, role);
            print_profile(&effective);
        }
    }
    Ok(())
}

fn print_profile(profile: &Profile) {
    let user = profile
        .user_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "(not set)".dimmed().to_string());
    println!("  Server:  {}", profile.server);
    println!("  User:    {}", user);
    println!("  Role:    {}", profile.role.as_deref().unwrap_or("customer"));
}

fn handle_wallet(client: &ApiClient, action: WalletAction) -> Result<()> {
    match action {
        WalletAction::Deposit { amount, to, currency, source } => {
            let body = json!({
                "userId": to,
                "amount": amount,
                "currency": currency,
                "fundingSource": source,
            });
            let outcome = client.post("/wallets/deposit", &body)?;
            success(&format!("Deposited {} {}", amount, currency));
            println!("  Wallet:  {}", field(&outcome, "walletId"));
            println!("  Balance: {}", field(&outcome, "balance"));
            print_fees(&outcome["fees"]);
        }
        WalletAction::Transfer { recipient, amount, currency, narration, client_ref } => {
            let body = json!({
                "recipientUserId": recipient,
                "amount": amount,
                "currency": currency,
                "narration": narration,
                "clientRef": client_ref,
            });
            let outcome = client.post("/wallets/transfer", &body)?;
            success(&format!("Sent {} {} to {}", amount, currency, recipient));
            println!("  Reference: {}", field(&outcome, "reference"));
            println!("  Balance:   {}", field(&outcome, "senderBalance"));
        }
        WalletAction::Withdraw { amount, currency, method, destination } => {
            let body = json!({
                "amount": amount,
                "currency": currency,
                "method": method,
                "destination": destination,
            });
            let outcome = client.post("/wallets/withdraw", &body)?;
            success(&format!("Withdrew {} {}", amount, currency));
            println!("  Withdrawal: {}", field(&outcome, "withdrawalId"));
            println!("  Balance:    {}", field(&outcome, "balance"));
            print_fees(&outcome["fees"]);
        }
        WalletAction::Balance { currency } => {
            let summary = client.get(&format!("/wallets/{}", currency))?;
            let wallet = &summary["wallet"];
            println!("{} wallet {}", field(wallet, "currency").bold(), field(wallet, "id"));
            println!("  Balance:   {}", field(wallet, "balance"));
            println!("  Available: {}", field(&summary, "available"));
            let entries = summary["recentEntries"].as_array().cloned().unwrap_or_default();
            if !entries.is_empty() {
                println!();
                println!("  Recent entries:");
                for entry in &entries {
                    let kind = field(entry, "direction");
                    let kind = if kind == "credit" { kind.green() } else { kind.red() };
                    println!(
                        "    {:<6} {:>14}  {}",
                        kind,
                        field(entry, "amount"),
                        field(entry, "reference")
                    );
                }
            }
        }
    }
    Ok(())
}

fn handle_order(client: &ApiClient, action: OrderAction) -> Result<()> {
    match action {
        OrderAction::Create { merchant, amount, currency, mode } => {
            let body = json!({
                "merchantId": merchant,
                "amount": amount,
                "currency": currency,
                "paymentMode": mode.as_str(),
            });
            let order = client.post("/orders", &body)?;
            success("Order created");
            print_order(&order);
        }
        OrderAction::Show { id } => {
            let order = client.get(&format!("/orders/{}", id))?;
            print_order(&order);
        }
        OrderAction::PayNow { id } => {
            let outcome = client.post(&format!("/orders/{}/pay-now", id), &json!({}))?;
            success(&format!(
                "Paid {} {}",
                field(&outcome, "amount"),
                field(&outcome, "currency")
            ));
            println!("  Status:  {}", field(&outcome, "status"));
            print_fees(&outcome["fees"]);
        }
    }
    Ok(())
}

fn handle_escrow(client: &ApiClient, order: Uuid, action: EscrowAction) -> Result<()> {
    let (verb, body) = match action {
        EscrowAction::Fund { condition } => ("fund", json!({ "releaseCondition": condition })),
        EscrowAction::Release => ("release", json!({})),
        EscrowAction::Cancel => ("cancel", json!({})),
        EscrowAction::Refund => ("refund", json!({})),
    };
    let outcome = client.post(&format!("/orders/{}/escrow/{}", order, verb), &body)?;
    success(&format!("Escrow {}", verb));
    println!("  Order:   {}", field(&outcome, "orderId"));
    println!("  Status:  {}", field(&outcome, "status"));
    println!("  Escrow:  {}", field(&outcome, "escrowStatus"));
    println!(
        "  Hold:    {} {}",
        field(&outcome, "holdAmount"),
        field(&outcome, "currency")
    );
    Ok(())
}

fn handle_plan(client: &ApiClient, action: PlanAction) -> Result<()> {
    match action {
        PlanAction::Create { order, schedule, mode } => {
            let body = json!({
                "orderId": order,
                "mode": mode.as_str(),
                "schedule": schedule,
            });
            let plan = client.post("/installments", &body)?;
            success("Plan created");
            print_plan(&plan);
        }
        PlanAction::Pay { plan, index } => {
            let payment =
                client.post(&format!("/installments/{}/pay", plan), &json!({ "index": index }))?;
            if payment["alreadyPaid"].as_bool().unwrap_or(false) {
                println!("{} Leg {} was already paid", "•".yellow(), index);
            } else {
                success(&format!(
                    "Paid leg {} ({} {})",
                    index,
                    field(&payment, "amount"),
                    field(&payment, "currency")
                ));
            }
            println!("  Plan:    {}", field(&payment, "planStatus"));
            println!("  Paid:    {}", field(&payment, "paidAmount"));
            if payment["escrowReleased"].as_bool().unwrap_or(false) {
                println!("  {}", "Escrow released to merchant".green());
            }
        }
        PlanAction::Show { plan } => {
            let plan = client.get(&format!("/installments/{}", plan))?;
            print_plan(&plan);
        }
    }
    Ok(())
}

fn handle_fees(client: &ApiClient, action: FeesAction) -> Result<()> {
    match action {
        FeesAction::Quote { applies_to, amount, currency, merchant } => {
            let body = json!({
                "appliesTo": applies_to,
                "amount": amount,
                "currency": currency,
                "merchantId": merchant,
            });
            let breakdown = client.post("/billing/calculate", &body)?;
            let items = breakdown["items"].as_array().cloned().unwrap_or_default();
            if items.is_empty() {
                println!("No fees apply to {} {} {}", applies_to, amount, currency);
                return Ok(());
            }
            for item in &items {
                println!(
                    "  {:<20} {:<9} {:>12}",
                    field(item, "feeCode"),
                    field(item, "payer"),
                    field(item, "amount")
                );
            }
            println!(
                "  {:<30} {:>12} {}",
                "Total".bold(),
                field(&breakdown, "total"),
                field(&breakdown, "currency")
            );
        }
        FeesAction::Apply {
            transaction_type,
            transaction_id,
            amount,
            currency,
            merchant,
            customer_wallet,
            merchant_wallet,
        } => {
            let body = json!({
                "transactionType": transaction_type,
                "transactionId": transaction_id,
                "baseAmount": amount,
                "currency": currency,
                "merchantId": merchant,
                "customerWalletId": customer_wallet,
                "merchantWalletId": merchant_wallet,
            });
            let result = client.post("/billing/apply", &body)?;
            success(&format!("Fees posted for {}", transaction_id));
            print_fees(&result);
        }
    }
    Ok(())
}

fn success(message: &str) {
    println!("{} {}", "✓".green().bold(), message.green());
}

fn print_order(order: &Value) {
    println!("  Order:    {}", field(order, "id"));
    println!("  Status:   {}", field(order, "status"));
    println!("  Mode:     {}", field(order, "payment_mode"));
    println!(
        "  Amount:   {} {}",
        field(order, "amount"),
        field(order, "currency")
    );
    println!("  Merchant: {}", field(order, "merchant_id"));
}

fn print_plan(plan: &Value) {
    println!("  Plan:    {}", field(plan, "id"));
    println!("  Order:   {}", field(plan, "order_id"));
    println!("  Mode:    {}", field(plan, "mode"));
    println!("  Status:  {}", field(plan, "status"));
    if let Some(legs) = plan["legs"].as_array() {
        for (index, leg) in legs.iter().enumerate() {
            let status = field(leg, "status");
            let status = if status == "paid" { status.green() } else { status.yellow() };
            println!("    [{}] {:>12}  {}", index, field(leg, "amount"), status);
        }
    }
}

fn print_fees(fees: &Value) {
    let applied = fees["applied"].as_array().cloned().unwrap_or_default();
    if applied.is_empty() {
        return;
    }
    println!("  Fees:");
    for fee in &applied {
        println!(
            "    {:<20} {:<9} {:>12}",
            field(fee, "feeCode"),
            field(fee, "payer"),
            field(fee, "amount")
        );
    }
    println!("    {:<30} {:>12}", "total", field(fees, "total"));
}

/// Renders a JSON field for display; numbers and decimals arrive as strings or numbers.
fn field(value: &Value, key: &str) -> String {
    match &value[key] {
        Value::String(s) => s.clone(),
        Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_plan_schedule() {
        let order = Uuid::new_v4();
        let cli = Cli::try_parse_from([
            "bridge",
            "plan",
            "create",
            &order.to_string(),
            "--schedule",
            "300,300,400",
        ])
        .unwrap();

        match cli.command {
            Commands::Plan {
                action: PlanAction::Create { schedule, mode, .. },
            } => {
                assert_eq!(schedule, vec!["300", "300", "400"]);
                assert_eq!(mode.as_str(), "INSTALLMENT_PAY_AFTER");
            }
            _ => panic!("expected plan create"),
        }
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "bridge",
            "order",
            "pay-now",
            &Uuid::new_v4().to_string(),
            "--idempotency-key",
            "checkout-7",
            "--server",
            "http://localhost:9000",
        ])
        .unwrap();

        assert_eq!(cli.idempotency_key.as_deref(), Some("checkout-7"));
        assert_eq!(cli.server.as_deref(), Some("http://localhost:9000"));
    }

    #[test]
    fn test_profile_set_takes_global_flags() {
        let user = Uuid::new_v4();
        let cli = Cli::try_parse_from([
            "bridge",
            "profile",
            "set",
            "--user",
            &user.to_string(),
            "--role",
            "merchant",
        ])
        .unwrap();

        assert!(matches!(
            cli.command,
            Commands::Profile { action: ProfileAction::Set }
        ));
        assert_eq!(cli.user, Some(user));
        assert_eq!(cli.role.as_deref(), Some("merchant"));
    }

    #[test]
    fn test_wallet_transfer_and_deposit_args() {
        let (recipient, owner) = (Uuid::new_v4(), Uuid::new_v4());
        let cli = Cli::try_parse_from([
            "bridge",
            "wallet",
            "transfer",
            &recipient.to_string(),
            "250",
            "--ref",
            "inv-7",
        ])
        .unwrap();
        match cli.command {
            Commands::Wallet {
                action: WalletAction::Transfer { recipient: r, amount, currency, client_ref, .. },
            } => {
                assert_eq!(r, recipient);
                assert_eq!(amount, "250");
                assert_eq!(currency, "KES");
                assert_eq!(client_ref.as_deref(), Some("inv-7"));
            }
            _ => panic!("expected wallet transfer"),
        }

        let cli = Cli::try_parse_from([
            "bridge",
            "wallet",
            "deposit",
            "1000",
            "--to",
            &owner.to_string(),
            "--role",
            "admin",
        ])
        .unwrap();
        match cli.command {
            Commands::Wallet {
                action: WalletAction::Deposit { to, .. },
            } => assert_eq!(to, Some(owner)),
            _ => panic!("expected wallet deposit"),
        }
    }

    #[test]
    fn test_field_rendering() {
        let value = json!({ "amount": "12.50", "index": 2, "missing": null });
        assert_eq!(field(&value, "amount"), "12.50");
        assert_eq!(field(&value, "index"), "2");
        assert_eq!(field(&value, "missing"), "-");
        assert_eq!(field(&value, "absent"), "-");
    }

    #[test]
    fn test_mode_wire_names() {
        assert_eq!(ModeArg::Installment.as_str(), "INSTALLMENT");
        assert_eq!(PlanModeArg::DeliverThenCollect.as_str(), "DELIVER_THEN_COLLECT");
    }
}
