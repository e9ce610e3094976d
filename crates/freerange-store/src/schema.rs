// Promoted keyword columns per entity; the full document lives in `doc`.
// Opaque payload fields (content.data, metadata, static_headers) stay inside
// the JSONB document and are never promoted.

diesel::table! {
    notifications (id) {
        id -> Text,
        app_id -> Text,
        user_id -> Text,
        template_id -> Nullable<Text>,
        channel -> Text,
        priority -> Text,
        status -> Text,
        category -> Nullable<Text>,
        scheduled_at -> Nullable<Timestamptz>,
        sent_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        doc -> Jsonb,
    }
}

diesel::table! {
    users (id) {
        id -> Text,
        app_id -> Text,
        external_user_id -> Nullable<Text>,
        email -> Nullable<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        doc -> Jsonb,
    }
}

diesel::table! {
    applications (id) {
        id -> Text,
        api_key -> Text,
        active -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        doc -> Jsonb,
    }
}

diesel::table! {
    templates (id) {
        id -> Text,
        app_id -> Text,
        name -> Text,
        locale -> Nullable<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        doc -> Jsonb,
    }
}

diesel::table! {
    schema_migrations (version) {
        version -> Text,
        name -> Text,
        checksum -> Text,
        applied_at -> Timestamptz,
    }
}
