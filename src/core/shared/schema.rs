diesel::table! {
    users (id) {
        id -> Int4,
        username -> Varchar,
        email -> Varchar,
        password_hash -> Varchar,
        first_name -> Nullable<Varchar>,
        last_name -> Nullable<Varchar>,
        role -> Varchar,
        is_admin -> Bool,
        is_top_level_admin -> Bool,
        first_level_channel_id -> Nullable<Int4>,
        channel_id -> Nullable<Int4>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    channels (id) {
        id -> Int4,
        channel_number -> Varchar,
        channel_name -> Varchar,
        channel_location -> Nullable<Varchar>,
        industry -> Nullable<Varchar>,
        contact_person -> Nullable<Varchar>,
        contact_number -> Nullable<Varchar>,
        email -> Nullable<Varchar>,
        website -> Nullable<Varchar>,
        app -> Nullable<Varchar>,
        official_account -> Nullable<Varchar>,
        douyin_account -> Nullable<Varchar>,
        balance -> Numeric,
        admin_user_id -> Nullable<Int4>,
        registration_time -> Timestamptz,
    }
}

diesel::table! {
    company_info (id) {
        id -> Int4,
        company_name -> Varchar,
        tax_number -> Varchar,
        industry -> Nullable<Varchar>,
        registration_type -> Nullable<Varchar>,
        taxpayer_nature -> Nullable<Varchar>,
        index_standard_type -> Nullable<Varchar>,
        uploaded_files -> Jsonb,
        upload_params -> Nullable<Jsonb>,
        user_id -> Int4,
        status -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    company_reports (id) {
        id -> Int4,
        user_id -> Int4,
        company_tax_number -> Varchar,
        report_type -> Varchar,
        year -> Int4,
        month -> Nullable<Int4>,
        quarter -> Nullable<Int4>,
        period -> Int4,
        report_data -> Jsonb,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    report_transactions (id) {
        id -> Int4,
        user_id -> Int4,
        channel_id -> Int4,
        report_id -> Nullable<Int4>,
        transaction_type -> Varchar,
        cost -> Numeric,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(company_info -> users (user_id));
diesel::joinable!(company_reports -> users (user_id));
diesel::joinable!(report_transactions -> users (user_id));
diesel::joinable!(report_transactions -> channels (channel_id));
diesel::joinable!(report_transactions -> company_reports (report_id));

diesel::allow_tables_to_appear_in_same_query!(
    users,
    channels,
    company_info,
    company_reports,
    report_transactions,
);
